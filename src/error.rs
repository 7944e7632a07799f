use anyhow::Error;
use std::fmt::Display;

use crate::compile::error_diagnostic;

/// Adds methods for failing without panic. Like `expect` but without panic.
pub trait NiceError<T> {
    /// Fail exiting with `1` if the value is an error. Otherwise return the content.
    fn nice_unwrap(self) -> T;

    /// Fail exiting with `1` if the value is an error, printing to stderr the message. Otherwise
    /// return the content.
    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T;
}

/// The text printed for `error`: the message, the chain of causes and, for a malformed IR file,
/// the offending row.
pub fn describe_error(error: &Error) -> String {
    let mut fail: &dyn std::error::Error = error.as_ref();
    let mut text = format!("Error: {fail}\n");
    while let Some(cause) = fail.source() {
        text += &format!("\nCaused by:\n    {cause}\n");
        fail = cause;
    }
    if let Some(diagnostic) = error_diagnostic(error) {
        text += &format!("\n{diagnostic}");
    }
    text
}

fn print_error(error: Error) {
    debug!("{:?}", error);
    eprint!("{}", describe_error(&error));
}

impl<T> NiceError<T> for Result<T, Error> {
    fn nice_unwrap(self) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(e);
                std::process::exit(1);
            }
        }
    }

    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(e.context(mex));
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};
    use speculoos::prelude::*;

    #[test]
    fn test_describe_chain() {
        let err = Err::<(), _>(anyhow!("disk on fire"))
            .context("Failed to write hdr.h")
            .unwrap_err();
        assert_eq!(
            describe_error(&err),
            "Error: Failed to write hdr.h\n\nCaused by:\n    disk on fire\n"
        );
    }

    #[test]
    fn test_nice_unwrap_ok() {
        let value: Result<u8, Error> = Ok(3);
        assert_that!(value.nice_unwrap()).is_equal_to(3);
        let value: Result<u8, Error> = Ok(4);
        assert_that!(value.nice_expect("unused")).is_equal_to(4);
    }
}
