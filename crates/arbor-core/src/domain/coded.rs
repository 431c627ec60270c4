//! Error code families.
//!
//! Codes are grouped by thousands: each family owns a group base and a fixed
//! table of `(local code, description)` pairs with local codes in `1..=999`.
//! The full code is `group + local`. A registry answers "is this code known"
//! and "describe this code" by probing the families in a fixed order, first
//! match wins.

/// Address family (1000).
pub const ADDRESS_GROUP: i64 = 1000;
/// Value family (2000).
pub const VALUE_GROUP: i64 = 2000;
/// Tree structure family (3000).
pub const STRUCTURE_GROUP: i64 = 3000;
/// Everything-else family (4000).
pub const OTHER_GROUP: i64 = 4000;

/// Server-side "timeout waiting for the value to change". Conditional
/// subscriptions treat it as a keep-alive, not a failure.
pub const CODE_SUBSCRIPTION_WAIT_EXPIRED: i64 = OTHER_GROUP + 4;

const ADDRESS_CODES: &[(i64, &str)] = &[
    (1, "Wrong address format"),
    (2, "Non-existent address"),
    (3, "Wrong parameters for address"),
    (4, "Access denied"),
];

const VALUE_CODES: &[(i64, &str)] = &[
    (1, "Default Value error"),
    (2, "Error creating value"),
    (3, "Too many retries to generate the value"),
];

const STRUCTURE_CODES: &[(i64, &str)] = &[
    (
        1,
        "Wrong tree architecture, unexpected end of the branch, no next component",
    ),
    (2, "Component has not implemented method or method work incorrect"),
];

const OTHER_CODES: &[(i64, &str)] = &[
    (1, "Wrong request"),
    (2, "Application do not answer"),
    (
        3,
        "This request cannot be subscribed. The cache does not store the value for this request",
    ),
    (4, "The time to generate the value has been exceeded"),
    (5, "The module could not connect to the external service."),
    (6, "Incorrectly calculated request timeout"),
    (7, "Wrong argument"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorFamily {
    Value,
    Structure,
    Address,
    Other,
}

impl ErrorFamily {
    /// Probe order of the registry. First family that knows a code wins.
    pub const PROBE_ORDER: [ErrorFamily; 4] = [
        ErrorFamily::Value,
        ErrorFamily::Structure,
        ErrorFamily::Address,
        ErrorFamily::Other,
    ];

    pub fn group(self) -> i64 {
        match self {
            ErrorFamily::Value => VALUE_GROUP,
            ErrorFamily::Structure => STRUCTURE_GROUP,
            ErrorFamily::Address => ADDRESS_GROUP,
            ErrorFamily::Other => OTHER_GROUP,
        }
    }

    fn local_codes(self) -> &'static [(i64, &'static str)] {
        match self {
            ErrorFamily::Value => VALUE_CODES,
            ErrorFamily::Structure => STRUCTURE_CODES,
            ErrorFamily::Address => ADDRESS_CODES,
            ErrorFamily::Other => OTHER_CODES,
        }
    }

    pub fn is_code_known(self, code: i64) -> bool {
        self.describe(code).is_some()
    }

    pub fn describe(self, code: i64) -> Option<&'static str> {
        let group = self.group();
        self.local_codes()
            .iter()
            .find(|(local, _)| group + local == code)
            .map(|(_, description)| *description)
    }
}

/// True if any family owns this code.
pub fn is_code_known(code: i64) -> bool {
    family_of(code).is_some()
}

/// Description for a known code, probing families in the fixed order.
pub fn describe_code(code: i64) -> Option<&'static str> {
    ErrorFamily::PROBE_ORDER
        .into_iter()
        .find_map(|family| family.describe(code))
}

/// Family owning the code, if any.
pub fn family_of(code: i64) -> Option<ErrorFamily> {
    ErrorFamily::PROBE_ORDER
        .into_iter()
        .find(|family| family.is_code_known(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_resolve_to_their_family() {
        assert_eq!(family_of(1001), Some(ErrorFamily::Address));
        assert_eq!(family_of(2003), Some(ErrorFamily::Value));
        assert_eq!(family_of(3002), Some(ErrorFamily::Structure));
        assert_eq!(family_of(4007), Some(ErrorFamily::Other));
        assert_eq!(family_of(4008), None);
        assert_eq!(family_of(5001), None);
    }

    #[test]
    fn descriptions_come_from_the_owning_table() {
        assert_eq!(describe_code(1004), Some("Access denied"));
        assert_eq!(
            describe_code(CODE_SUBSCRIPTION_WAIT_EXPIRED),
            Some("The time to generate the value has been exceeded")
        );
        assert_eq!(describe_code(999), None);
    }

    #[test]
    fn group_base_alone_is_not_a_known_code() {
        // Local codes start at 1, so the bare group number is unknown.
        assert!(!is_code_known(ADDRESS_GROUP));
        assert!(!is_code_known(OTHER_GROUP));
    }
}
