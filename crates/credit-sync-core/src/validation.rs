//! Validation of decoded credit events.

use crate::error::ValidationError;
use crate::event::CreditEvent;
use crate::types::Email;

/// Validate a credit event and return the balance it sets.
///
/// A negative balance is rejected, never clamped to zero.
pub fn validate_credit_event(event: &CreditEvent) -> Result<u64, ValidationError> {
    u64::try_from(event.credits).map_err(|_| ValidationError::NegativeCredits {
        event_id: event.event_id,
        credits: event.credits,
    })
}

/// Validate a raw email string.
pub fn validate_email(raw: &str) -> Result<Email, ValidationError> {
    Email::parse(raw).map_err(|_| ValidationError::InvalidEmail(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(credits: i64) -> CreditEvent {
        CreditEvent::with_nonce(Email::parse("a@x.com").unwrap(), credits, 1000, 0)
    }

    #[test]
    fn test_valid_balance() {
        assert_eq!(validate_credit_event(&event(0)).unwrap(), 0);
        assert_eq!(validate_credit_event(&event(25)).unwrap(), 25);
    }

    #[test]
    fn test_negative_balance_rejected() {
        let e = event(-1);
        let err = validate_credit_event(&e).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NegativeCredits {
                event_id: e.event_id,
                credits: -1
            }
        );
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(matches!(
            validate_email("bogus"),
            Err(ValidationError::InvalidEmail(_))
        ));
    }
}
