use std::sync::Arc;

use crate::domain::{ManagerLoadError, UserId};
use crate::ports::ProblemRepository;

pub const MIN_PROBLEMS_AT_SAME_TIME: usize = 1;
pub const MAX_PROBLEMS_AT_SAME_TIME: usize = 30;

/// Decides whether a manager has room for one more open problem.
pub struct ManagerLoad {
    max_problems_at_same_time: usize,
    problems: Arc<dyn ProblemRepository>,
}

impl ManagerLoad {
    pub fn new(
        max_problems_at_same_time: usize,
        problems: Arc<dyn ProblemRepository>,
    ) -> Result<Self, ManagerLoadError> {
        if !(MIN_PROBLEMS_AT_SAME_TIME..=MAX_PROBLEMS_AT_SAME_TIME)
            .contains(&max_problems_at_same_time)
        {
            return Err(ManagerLoadError::InvalidOptions(format!(
                "max_problems_at_same_time must be in \
                 {MIN_PROBLEMS_AT_SAME_TIME}..={MAX_PROBLEMS_AT_SAME_TIME}, got {max_problems_at_same_time}"
            )));
        }
        Ok(Self {
            max_problems_at_same_time,
            problems,
        })
    }

    pub async fn can_manager_take_problem(
        &self,
        manager_id: UserId,
    ) -> Result<bool, ManagerLoadError> {
        let open = self
            .problems
            .get_manager_open_problems_count(manager_id)
            .await?;
        Ok(open < self.max_problems_at_same_time)
    }
}
