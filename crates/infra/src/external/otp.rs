//! One-time-password delivery and checking.
//!
//! There is no SMS provider: [`MockOtpGateway`] logs the "sent" code and
//! accepts exactly the configured one.

use thiserror::Error;
use tracing::info;

use clearpath_actors::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtpError {
    #[error("Invalid OTP. KYC failed.")]
    Mismatch,

    #[error("OTP delivery failed: {0}")]
    Delivery(String),
}

pub trait OtpGateway: Send + Sync {
    /// Deliver a code to the actor's phone.
    fn send(&self, actor_id: ActorId, phone_number: &str) -> Result<(), OtpError>;

    /// Check a code submitted by the actor.
    fn verify(&self, actor_id: ActorId, code: &str) -> Result<(), OtpError>;
}

impl<G> OtpGateway for std::sync::Arc<G>
where
    G: OtpGateway + ?Sized,
{
    fn send(&self, actor_id: ActorId, phone_number: &str) -> Result<(), OtpError> {
        (**self).send(actor_id, phone_number)
    }

    fn verify(&self, actor_id: ActorId, code: &str) -> Result<(), OtpError> {
        (**self).verify(actor_id, code)
    }
}

#[derive(Debug, Clone)]
pub struct MockOtpGateway {
    code: String,
}

impl MockOtpGateway {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl OtpGateway for MockOtpGateway {
    fn send(&self, actor_id: ActorId, phone_number: &str) -> Result<(), OtpError> {
        info!(
            target: "clearpath::sms",
            %actor_id,
            phone_number = %mask_phone(phone_number),
            otp = %self.code,
            "simulated OTP sent"
        );
        Ok(())
    }

    fn verify(&self, _actor_id: ActorId, code: &str) -> Result<(), OtpError> {
        if code.trim() == self.code {
            Ok(())
        } else {
            Err(OtpError::Mismatch)
        }
    }
}

/// Keep the last four digits only.
fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    let keep = digits.len().min(4);
    let masked = digits.len() - keep;
    "*".repeat(masked) + &digits[masked..].iter().collect::<String>()
}
