//! Recipient normalization.
//!
//! Callers may address a message with a bare string, an `{address, name}`
//! object, or an ordered list mixing both. Transports only ever see the
//! normalized [`AddressEntry`] form produced here.

use crate::types::{AddressEntry, Message, Recipient, RecipientInput};

/// Normalizes an optional recipient input into an ordered entry list.
///
/// Absent input yields an empty list. Names are only kept when present and
/// non-empty.
pub fn normalize(input: Option<&RecipientInput>) -> Vec<AddressEntry> {
    match input {
        None => Vec::new(),
        Some(RecipientInput::One(recipient)) => vec![normalize_one(recipient)],
        Some(RecipientInput::Many(recipients)) => normalize_all(recipients),
    }
}

/// Normalizes a recipient list, keeping its order.
pub fn normalize_all(recipients: &[Recipient]) -> Vec<AddressEntry> {
    recipients.iter().map(normalize_one).collect()
}

fn normalize_one(recipient: &Recipient) -> AddressEntry {
    match recipient {
        Recipient::Address(address) => AddressEntry::new(address.clone()),
        Recipient::Entry(entry) => AddressEntry {
            address: entry.address.clone(),
            name: entry.name.clone().filter(|name| !name.is_empty()),
        },
    }
}

/// Every recipient of `message`: To, then Cc, then Bcc.
pub fn flatten(message: &Message) -> Vec<AddressEntry> {
    let mut all = normalize_all(&message.to);
    all.extend(normalize_all(&message.cc));
    all.extend(normalize_all(&message.bcc));
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bare_string(
        Some(RecipientInput::from("a@x.com")),
        vec![AddressEntry::new("a@x.com")]
    )]
    #[case::object_with_name(
        Some(RecipientInput::from(("a@x.com", "A"))),
        vec![AddressEntry::with_name("a@x.com", "A")]
    )]
    #[case::mixed_list(
        Some(RecipientInput::Many(vec![
            Recipient::from(("a@x.com", "A")),
            Recipient::from("b@x.com"),
        ])),
        vec![AddressEntry::with_name("a@x.com", "A"), AddressEntry::new("b@x.com")]
    )]
    #[case::absent(None, vec![])]
    #[case::empty_list(Some(RecipientInput::Many(vec![])), vec![])]
    fn test_normalize(#[case] input: Option<RecipientInput>, #[case] expected: Vec<AddressEntry>) {
        let normalized = normalize(input.as_ref());
        assert_eq!(normalized, expected);

        let names: Vec<_> = normalized.iter().map(|e| e.name.clone()).collect();
        let expected_names: Vec<_> = expected.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, expected_names);
    }

    #[test]
    fn test_empty_name_is_dropped() {
        let input = RecipientInput::from(("a@x.com", ""));
        let normalized = normalize(Some(&input));
        assert_eq!(normalized[0].address, "a@x.com");
        assert!(normalized[0].name.is_none());
    }

    #[test]
    fn test_flatten_orders_to_cc_bcc() {
        let mut message = Message::new();
        message
            .bcc("b1@x.com")
            .cc("c1@x.com")
            .to(vec!["t1@x.com", "t2@x.com"]);

        let addresses: Vec<_> = flatten(&message).into_iter().map(|e| e.address).collect();
        assert_eq!(addresses, vec!["t1@x.com", "t2@x.com", "c1@x.com", "b1@x.com"]);
    }
}
