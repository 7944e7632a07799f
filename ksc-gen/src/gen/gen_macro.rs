/// Emit a sequence of items into a [`GenBuffer`](super::GenBuffer).
///
/// Items are separated by `;`, which also ends the current line:
/// - `"fmt {}" % (a, b)` formats the [`Gen`](super::Gen) items `a` and `b` into the template;
/// - `"text"` appends the literal;
/// - `({ ... })` emits the body one indentation level deeper;
/// - `(a, b)` calls `gen` on each item, `ident` is a shorthand for `(ident)`;
/// - `|| expr` evaluates a `Result` expression and propagates its error;
/// - `{ ... }` groups items.
macro_rules! gen {
    ($ctx:expr) => {
        {
            {
                let _ctx = &$ctx;
            }
            Ok(())
        }
    };
    ($ctx:expr, ) => {
        {
            gen!($ctx)
        }
    };
    ($ctx:expr, ; $($rest:tt)* ) => {
        {
            $ctx.endl()?;
            gen!($ctx, $($rest)*)
        }
    };
    ($ctx:expr, $lit:literal % ( $($expr:expr),* $(,)? ) $( ; $($rest:tt)* )?) => {
        {
            let GenBuffer { lang, indent, unit, .. } = *$ctx;
            $ctx.append(format_args!($lit, $( GenToken { lang, indent, unit, inner: $expr } ),*))?;
            gen!($ctx, $( ; $($rest)* )?)
        }
    };
    ($ctx:expr, $lit:literal % $expr:expr $( ; $($rest:tt)* )?) => {
        {
            gen!($ctx, $lit % ($expr))?;
            gen!($ctx, $( ; $($rest)* )?)
        }
    };
    ($ctx:expr, $lit:literal $( ; $($rest:tt)* )?) => {
        {
            $ctx.append($lit)?;
            gen!($ctx, $( ; $($rest)* )?)
        }
    };
    ($ctx:expr, $ident:ident $( ; $($rest:tt)* )?) => {
        {
            gen!($ctx, ( $ident ) $( ; $($rest)* )?)
        }
    };
    ($ctx:expr, || $body:expr $( ; $($rest:tt)* )?) => {
        {
            {
                let result: Result = $body;
                result?;
            }
            gen!($ctx, $( $($rest)* )?)
        }
    };
    ($ctx:expr, ({ $($body:tt)* }) ; $($rest:tt)*) => {
        {
            $ctx.block_begin()?;
            gen!($ctx, $($body)*)?;
            $ctx.block_end()?;
            gen!($ctx, $($rest)*)
        }
    };
    ($ctx:expr, () $( ; $($rest:tt)* )?) => {
        {
            gen!($ctx, $( ; $($rest)* )?)
        }
    };
    ($ctx:expr, ( $( $expr:expr ),* ) $( ; $($rest:tt)* )?) => {
        {
            $(
                $ctx.gen($expr)?;
            )*
            gen!($ctx, $( $($rest)* )?)
        }
    };
    ($ctx:expr, { $($body:tt)* } $($rest:tt)*) => {
        {
            gen!($ctx, $($body)*)?;
            gen!($ctx, $($rest)*)
        }
    };
}

pub(crate) use gen;
