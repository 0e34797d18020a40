pub mod notification_log_repository;
pub mod notification_queue_repository;
pub mod task_repository;

pub use notification_log_repository::NotificationLogRepository;
pub use notification_queue_repository::NotificationQueueRepository;
pub use task_repository::TaskRepository;
