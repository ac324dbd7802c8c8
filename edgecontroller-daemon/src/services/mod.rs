//! gRPC service implementations.

mod credentials;
mod rate_limit;

pub use credentials::{AuthServiceImpl, CredentialIssuer, IssueError};
pub use rate_limit::{EnrollmentRateLimiter, RateLimitInterceptor};
