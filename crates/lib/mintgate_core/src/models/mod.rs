//! Domain models.
//!
//! These are internal domain models shared by the stores, the resolver and
//! the gate. API-facing request/response shapes live in `mintgate_api`.

pub mod account;
pub mod audit;
pub mod permission;
pub mod setting;

pub use account::{Account, AccountStatus, Address, AddressError, Role};
pub use audit::{AuditEntry, AuditFilter, NewAuditEntry};
pub use permission::{DEFAULT_ADMIN_PERMISSIONS, Permission, PermissionGrant};
pub use setting::Setting;
