use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::OutboxError;

use super::job::Job;

/// Registry of jobs (name -> job).
///
/// Built during startup (mutable), read by workers afterwards (immutable),
/// so lookups need no lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    pub fn register(&mut self, job: Arc<dyn Job>) -> Result<(), OutboxError> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(OutboxError::DuplicateJob(name));
        }
        self.jobs.insert(name, job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Job>> {
        self.jobs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
