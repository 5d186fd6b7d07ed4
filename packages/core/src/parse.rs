//! A thin `nom`-based parsing layer, grounded in the combinators the
//! teacher's `serial/src/frame.rs` and `core/src/definitions/node_id.rs`
//! already use directly (`nom::bytes`, `nom::number`, `nom::combinator`).

pub type Input<'a> = &'a [u8];
pub type ParseResult<'a, T> = nom::IResult<Input<'a>, T>;

/// Analogous to the teacher's `Parsable` trait (`zwave_core::prelude::Parsable`),
/// but operating on borrowed byte slices instead of a custom `Bytes` cursor,
/// since this crate does not replicate the teacher's full `bake`/`munch`
/// framework (see `DESIGN.md`).
pub trait Parsable: Sized {
    fn parse(i: Input) -> ParseResult<Self>;
}

pub mod combinators {
    use super::*;
    use nom::error::{Error as NomError, ErrorKind};

    /// Fails the parse with a custom message if `cond` is false, without
    /// consuming input. Mirrors the teacher's `zwave_core::parse::validate`.
    pub fn validate(i: Input, cond: bool) -> ParseResult<()> {
        if cond {
            Ok((i, ()))
        } else {
            Err(nom::Err::Failure(NomError::new(i, ErrorKind::Verify)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_passes_through_input() {
        let data = [1u8, 2, 3];
        let (rest, ()) = combinators::validate(&data, true).unwrap();
        assert_eq!(rest, &data);
    }

    #[test]
    fn validate_fails_on_false() {
        let data = [1u8, 2, 3];
        assert!(combinators::validate(&data, false).is_err());
    }
}
