pub mod audit;
pub mod confirm;
pub mod decision;
pub mod engine;
pub mod error;
pub mod index;
pub mod inventory;
pub mod report;
pub mod resolver;
pub mod scopes;

pub use audit::AuditLog;
pub use confirm::{Confirmer, PendingAction};
pub use decision::{mutation_gate, parse_answer, Approval, Gate, Outcome};
pub use engine::{migrate, Migrator};
pub use error::{MigrateError, ResolutionError};
pub use index::{assignments_at, AssignmentIndex};
pub use inventory::inventory;
pub use report::{
    ExportedArtifacts, InventoryReport, InventoryRequest, MigrationOptions, MigrationReport, RowSkip,
    StatusCounts,
};
pub use resolver::IdentityResolver;
pub use scopes::list_scopes;
