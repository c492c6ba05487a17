//! Shared test fixtures — spec.md §8.4.
//!
//! DB-touching integration tests across the workspace build on these three
//! pieces: [`db::testkit_pool`] for a migrated connection, [`fixtures`] for
//! the minimal tenant/hospital rows every scenario needs, and [`clock`] for
//! driving expiry/window logic without a real wall-clock wait.

pub mod bearer;
pub mod clock;
pub mod db;
pub mod fixtures;

pub use bearer::bearer_token;
pub use clock::FakeClock;
pub use fixtures::{HospitalFixture, ShiftFixture, TenantFixture};
