//! Repository ports for entities owned by the surrounding service.
//!
//! Only the subset the scheduler and the notification job need.

use async_trait::async_trait;

use crate::domain::{ChatId, Message, MessageId, Problem, ProblemId, RequestId, StoreError, UserId};

#[async_trait]
pub trait ProblemRepository: Send + Sync {
    /// Open problems without a manager, oldest first, at most `limit`.
    ///
    /// `limit == 0` is rejected with `StoreError::InvalidArgument`.
    async fn get_problems_without_manager(&self, limit: usize) -> Result<Vec<Problem>, StoreError>;

    /// Bind a manager. Fails with `StoreError::Conflict` if the problem
    /// already has one.
    async fn set_manager_for_problem(
        &self,
        problem_id: ProblemId,
        manager_id: UserId,
    ) -> Result<(), StoreError>;

    /// Request ID of the first manager-visible message of the problem.
    async fn get_problem_initial_request_id(
        &self,
        problem_id: ProblemId,
    ) -> Result<RequestId, StoreError>;

    async fn get_manager_open_problems_count(&self, manager_id: UserId)
    -> Result<usize, StoreError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_service_message_for_client(
        &self,
        request_id: RequestId,
        problem_id: ProblemId,
        chat_id: ChatId,
        body: &str,
    ) -> Result<MessageId, StoreError>;

    async fn get_message_by_id(&self, message_id: MessageId) -> Result<Message, StoreError>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn get_chat_client(&self, chat_id: ChatId) -> Result<UserId, StoreError>;

    /// Manager of the chat's open problem.
    async fn get_chat_manager(&self, chat_id: ChatId) -> Result<UserId, StoreError>;
}
