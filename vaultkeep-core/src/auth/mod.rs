//! Master password gate and brute-force lockout.

pub mod gate;
pub mod lockout;

pub use gate::{AuthGate, AuthState, KeyRotation, LockReason, LockoutStatus, PasswordChange};
pub use lockout::{LockoutPolicy, LockoutState};
