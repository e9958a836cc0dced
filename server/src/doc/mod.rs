pub mod access;
pub mod lifecycle;
pub mod reminders;

pub use access::{AuthorizedTarget, DocumentAccessService, TargetRecord};
pub use lifecycle::{CreateDocumentInput, CreateTemplateInput, DocumentLifecycleService};
pub use reminders::ReminderService;
