//! Adapters for services outside the process.

pub mod otp;

pub use otp::{MockOtpGateway, OtpError, OtpGateway};
