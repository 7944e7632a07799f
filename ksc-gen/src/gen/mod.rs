//! Indentation-aware text emission shared by all the backends.

use std::fmt::Display;
use std::fmt::Write;

mod gen_macro;
pub(crate) use gen_macro::*;

pub use std::fmt::Result;

pub type GenContext<'a, 'b, L> = &'a mut GenBuffer<'b, L>;

/// The output of a backend, with the state needed to indent it.
///
/// `lang` is the backend context: it tells items how to render themselves (names in scope,
/// accessor conventions and so on).
pub struct GenBuffer<'a, L> {
    pub lang: &'a L,
    pub fmt: &'a mut dyn Write,
    pub needs_indent: &'a mut bool,
    pub indent: u8,
    /// One level of indentation.
    pub unit: &'static str,
}

/// Something that can be emitted by the backend `L`.
pub trait Gen<L> {
    fn gen(&self, ctx: GenContext<L>) -> Result;
}

/// Adapter to use a [`Gen`] item as a `format!` argument.
pub struct GenToken<'a, L, T: ?Sized> {
    pub lang: &'a L,
    pub inner: &'a T,
    pub indent: u8,
    pub unit: &'static str,
}

impl<L, T: Gen<L> + ?Sized> Display for GenToken<'_, L, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result {
        let Self {
            indent,
            lang,
            inner,
            unit,
        } = self;
        inner.gen(&mut GenBuffer {
            lang,
            fmt: f,
            needs_indent: &mut false,
            indent: *indent,
            unit,
        })
    }
}

impl<L> GenBuffer<'_, L> {
    pub fn append<T: Display>(&mut self, token: T) -> Result {
        if *self.needs_indent {
            for _ in 0..self.indent {
                self.fmt.write_str(self.unit)?;
            }
            *self.needs_indent = false;
        }
        write!(self.fmt, "{}", token)
    }

    pub fn gen<T: Gen<L> + ?Sized>(&mut self, token: &T) -> Result {
        token.gen(self)
    }

    pub fn endl(&mut self) -> Result {
        writeln!(self.fmt)?;
        *self.needs_indent = true;
        Ok(())
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn block_begin(&mut self) -> Result {
        self.indent();
        Ok(())
    }

    pub fn block_end(&mut self) -> Result {
        self.dedent();
        Ok(())
    }

    /// Continue emitting into the same output with another backend context.
    pub fn with_lang<'b, M>(&'b mut self, lang: &'b M) -> GenBuffer<'b, M> {
        GenBuffer {
            lang,
            fmt: self.fmt,
            needs_indent: self.needs_indent,
            indent: self.indent,
            unit: self.unit,
        }
    }
}

/// Emit `item` into a new string, indenting with `unit`.
pub fn gen_string<L, T: Gen<L> + ?Sized>(
    item: &T,
    lang: &L,
    unit: &'static str,
) -> std::result::Result<String, std::fmt::Error> {
    let mut out = String::new();
    let mut ctx = GenBuffer {
        lang,
        fmt: &mut out,
        indent: 0,
        needs_indent: &mut true,
        unit,
    };
    item.gen(&mut ctx)?;
    Ok(out)
}

impl<L> Gen<L> for str {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        ctx.append(self)
    }
}

impl<L> Gen<L> for String {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        ctx.append(self)
    }
}

impl<L, T: Gen<L> + ?Sized> Gen<L> for &T {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        (**self).gen(ctx)
    }
}

impl<L, T: Gen<L>> Gen<L> for Option<T> {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        match self {
            Some(item) => item.gen(ctx),
            None => Ok(()),
        }
    }
}

impl<L, T: Gen<L>> Gen<L> for [T] {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        for item in self {
            item.gen(ctx)?;
        }
        Ok(())
    }
}

impl<L, T: Gen<L>> Gen<L> for Vec<T> {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        self.as_slice().gen(ctx)
    }
}

impl<L> Gen<L> for () {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        gen!(ctx)
    }
}

/// Items separated by a punctuation.
pub struct Punctuated<T, P>(pub Vec<T>, pub P);

impl<L, T, P> Gen<L> for Punctuated<T, P>
where
    T: Gen<L>,
    P: Display,
{
    fn gen(&self, ctx: GenContext<L>) -> Result {
        let mut first = true;
        let Self(items, punct) = self;

        for item in items {
            if !first {
                ctx.append(punct)?;
            }
            first = false;
            gen!(ctx, item)?;
        }

        gen!(ctx)
    }
}

/// Newtype for items that are generated verbatim.
pub struct Raw<T>(pub T);

impl<L, T> Gen<L> for Raw<T>
where
    T: Display,
{
    fn gen(&self, ctx: GenContext<L>) -> Result {
        ctx.append(&self.0)
    }
}

/// Text emitted as a line of its own.
pub struct Line<T>(pub T);

impl<L, T: Display> Gen<L> for Line<T> {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        ctx.append(&self.0)?;
        ctx.endl()
    }
}

/// A line opening a block, followed by the single line of its body.
pub struct Branch {
    pub head: String,
    pub body: String,
}

impl<L> Gen<L> for Branch {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        gen!(ctx, {
            (&Line(&self.head));
            ({
                (&Line(&self.body));
            });
        })
    }
}

/// An empty line.
pub struct Blank;

impl<L> Gen<L> for Blank {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        ctx.endl()
    }
}

/// An empty line, only when `cond` holds.
pub fn blank_if(cond: bool) -> Option<Blank> {
    cond.then_some(Blank)
}

/// One line per entry, every entry but the last followed by `sep`.
pub fn separated_lines(entries: Vec<String>, sep: &str) -> Vec<Line<String>> {
    let last = entries.len().saturating_sub(1);
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            if i < last {
                Line(format!("{entry}{sep}"))
            } else {
                Line(entry)
            }
        })
        .collect()
}
