//! ECN codepoint propagation across the tunnel, implementing the
//! RFC 6040 decapsulation rule.

/// An IP ECN codepoint, as carried in the low two bits of the DSCP/ECN byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcnCodepoint {
    NotEct,
    Ect1,
    Ect0,
    Ce,
}

impl EcnCodepoint {
    /// Decode from the low 2 bits of an IP header's ECN field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => EcnCodepoint::NotEct,
            0b01 => EcnCodepoint::Ect1,
            0b10 => EcnCodepoint::Ect0,
            _ => EcnCodepoint::Ce,
        }
    }

    /// Encode back to the low 2 bits of an IP header's ECN field.
    pub fn to_bits(self) -> u8 {
        match self {
            EcnCodepoint::NotEct => 0b00,
            EcnCodepoint::Ect1 => 0b01,
            EcnCodepoint::Ect0 => 0b10,
            EcnCodepoint::Ce => 0b11,
        }
    }
}

/// Error decapsulating ECN across the tunnel boundary.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EcnError {
    /// Outer carried CE but inner was not ECN-capable; RFC 6040 forbids
    /// inventing congestion marks on a flow that never opted into ECN.
    #[error("illegal ECN combination: CE outer with not-ECT inner")]
    IllegalCombination,
}

/// Apply the outer ECN codepoint to an inner one on decapsulation, per
/// RFC 6040 §4.2's "full functionality" mode:
///
/// - outer CE + inner not-ECT is illegal and must be dropped (counted as a
///   receive error, not silently corrected).
/// - outer CE otherwise propagates CE to the inner codepoint.
/// - any other outer value leaves the inner codepoint unchanged.
pub fn decapsulate_ecn(outer: EcnCodepoint, inner: EcnCodepoint) -> Result<EcnCodepoint, EcnError> {
    match (outer, inner) {
        (EcnCodepoint::Ce, EcnCodepoint::NotEct) => Err(EcnError::IllegalCombination),
        (EcnCodepoint::Ce, _) => Ok(EcnCodepoint::Ce),
        (_, inner) => Ok(inner),
    }
}

/// Apply the inner ECN codepoint to the outer header on encapsulation. The
/// tunnel copies the inner codepoint outward unchanged; it never invents a
/// congestion mark, so the "never mark CE on a non-ECT flow" invariant holds
/// for free.
pub fn encapsulate_ecn(inner: EcnCodepoint) -> EcnCodepoint {
    inner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bits() {
        for bits in 0u8..4 {
            let codepoint = EcnCodepoint::from_bits(bits);
            assert_eq!(codepoint.to_bits(), bits);
        }
    }

    #[test]
    fn ce_outer_propagates_to_ect_inner() {
        let result = decapsulate_ecn(EcnCodepoint::Ce, EcnCodepoint::Ect0);
        assert_eq!(result, Ok(EcnCodepoint::Ce));
    }

    #[test]
    fn ce_outer_with_not_ect_inner_is_illegal() {
        let result = decapsulate_ecn(EcnCodepoint::Ce, EcnCodepoint::NotEct);
        assert_eq!(result, Err(EcnError::IllegalCombination));
    }

    #[test]
    fn non_ce_outer_passes_inner_through() {
        for inner in [EcnCodepoint::NotEct, EcnCodepoint::Ect0, EcnCodepoint::Ect1] {
            let result = decapsulate_ecn(EcnCodepoint::Ect0, inner);
            assert_eq!(result, Ok(inner));
        }
    }

    #[test]
    fn encapsulate_copies_inner_outward() {
        assert_eq!(encapsulate_ecn(EcnCodepoint::Ect1), EcnCodepoint::Ect1);
        assert_eq!(encapsulate_ecn(EcnCodepoint::NotEct), EcnCodepoint::NotEct);
    }
}
