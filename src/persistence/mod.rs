//! `SQLite` persistence: connection bootstrap and one repository per
//! aggregate. These repos are the collaborator boundary consumed by the
//! supervisor and the task registry; failures here are logged and must
//! never block task finalization.

pub mod credential_repo;
pub mod db;
pub mod message_repo;
pub mod project_repo;
pub mod schema;
pub mod session_repo;
pub mod settings_repo;
