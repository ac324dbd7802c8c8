//! CLI commands.

pub mod enroll;
pub mod keygen;

pub use enroll::run_enrollment;
pub use keygen::{run_csr, run_keygen};
