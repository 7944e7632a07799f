//! The textual, line-oriented IR format.
//!
//! A file starts with the `KSIR1` tag, the spec name and its default endianness, followed by the
//! `imports`, `types`, `attrs`, `enums`, `instances` and `validations` sections, each introduced
//! by a header carrying its row count, and a final `end` line. Strings are double-quoted with
//! backslash escapes, expressions are stored as quoted prefix forms.

use std::fmt::Write;
use std::str::Lines;
use std::vec::IntoIter;

use crate::error::Error;
use crate::model::*;
use crate::validate::validate;
use crate::Expr;

const HEADER: &str = "KSIR1";
const END: &str = "end";
const NONE: &str = "none";
const ELSE: &str = "else";

/// Quote a string the way IR rows do: double quotes, with `\` and `"` escaped.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn quote_opt_expr(expr: &Option<Expr>) -> String {
    match expr {
        Some(expr) => quote(&expr.to_string()),
        None => quote(NONE),
    }
}

fn quote_opt(s: &Option<String>) -> String {
    quote(s.as_deref().unwrap_or(NONE))
}

fn type_ref(ty: &TypeRef) -> String {
    match ty {
        TypeRef::Primitive(p) => format!("primitive {}", quote(p.as_str())),
        TypeRef::User(name) => format!("user {}", quote(name)),
    }
}

fn endian_opt(endian: Option<Endian>) -> &'static str {
    endian.map(|e| e.as_str()).unwrap_or(NONE)
}

/// Serialize a spec to the canonical textual form.
///
/// Every optional field is written out, so that deserializing and serializing again yields the
/// very same text.
pub fn serialize(spec: &Spec) -> String {
    // Writing into a String never fails.
    let mut out = String::new();
    let _ = write_spec(&mut out, spec);
    out
}

fn write_spec(out: &mut String, spec: &Spec) -> std::fmt::Result {
    writeln!(out, "{HEADER}")?;
    writeln!(out, "name {}", quote(&spec.name))?;
    writeln!(out, "default_endian {}", spec.default_endian)?;

    writeln!(out, "imports {}", spec.imports.len())?;
    for import in &spec.imports {
        writeln!(out, "import {}", quote(import))?;
    }

    writeln!(out, "types {}", spec.types.len())?;
    for ty in &spec.types {
        writeln!(out, "type {} {}", quote(&ty.name), type_ref(&ty.ty))?;
    }

    writeln!(out, "attrs {}", spec.attrs.len())?;
    for attr in &spec.attrs {
        write!(
            out,
            "attr {} {} {} {} {} {} {} {} {} {} {}",
            quote(&attr.id),
            type_ref(&attr.ty),
            endian_opt(attr.endian),
            quote_opt_expr(&attr.size),
            quote_opt(&attr.enum_name),
            quote_opt(&attr.encoding),
            quote_opt_expr(&attr.if_expr),
            attr.repeat.as_str(),
            quote_opt_expr(&attr.repeat_expr),
            quote_opt_expr(&attr.switch_on),
            attr.switch_cases.len()
        )?;
        for case in &attr.switch_cases {
            let matches = match &case.matches {
                Some(expr) => quote(&expr.to_string()),
                None => quote(ELSE),
            };
            write!(out, " {} {}", matches, type_ref(&case.ty))?;
        }
        match attr.process {
            Some(Process::XorConst(key)) => writeln!(out, " xor_const {key}")?,
            None => writeln!(out, " {NONE}")?,
        }
    }

    writeln!(out, "enums {}", spec.enums.len())?;
    for e in &spec.enums {
        writeln!(out, "enum {} {}", quote(&e.name), e.values.len())?;
        for v in &e.values {
            writeln!(out, "enum_value {} {}", v.value, quote(&v.name))?;
        }
    }

    writeln!(out, "instances {}", spec.instances.len())?;
    for inst in &spec.instances {
        match &inst.kind {
            InstanceKind::Value(expr) => writeln!(
                out,
                "instance {} value {}",
                quote(&inst.id),
                quote(&expr.to_string())
            )?,
            InstanceKind::Parse(parse) => writeln!(
                out,
                "instance {} parse {} {} {} {} {}",
                quote(&inst.id),
                type_ref(&parse.ty),
                endian_opt(parse.endian),
                quote_opt_expr(&parse.pos),
                quote_opt_expr(&parse.size),
                quote_opt(&parse.encoding)
            )?,
        }
    }

    writeln!(out, "validations {}", spec.validations.len())?;
    for v in &spec.validations {
        writeln!(
            out,
            "validation {} {} {}",
            quote(&v.target),
            quote(&v.condition.to_string()),
            quote(&v.message)
        )?;
    }
    writeln!(out, "{END}")
}

/// Deserialize and validate a spec.
pub fn deserialize(text: &str) -> Result<Spec, Error> {
    let spec = deserialize_unchecked(text)?;
    validate(&spec)?;
    Ok(spec)
}

/// Deserialize a spec without validating it. Used for the files of an import graph, which are
/// validated once merged, and for embedded scopes.
pub fn deserialize_unchecked(text: &str) -> Result<Spec, Error> {
    let mut reader = Reader {
        lines: text.lines(),
        line_no: 0,
        peeked: None,
    };

    let (line_no, line) = reader.next_line();
    if line.map(str::trim_end) != Some(HEADER) {
        return Err(Error::malformed(line_no, line.unwrap_or(""), "missing KSIR1 header"));
    }

    let mut spec = Spec::default();

    let mut row = reader.row("invalid name line", "invalid name line")?;
    row.keyword("name")?;
    spec.name = row.string()?;

    let mut row = reader.row("invalid default_endian line", "invalid default_endian line")?;
    row.keyword("default_endian")?;
    spec.default_endian = row.parse()?;

    if reader.peek_keyword() == Some("imports") {
        for mut row in reader.section("imports", "import")? {
            row.keyword("import")?;
            spec.imports.push(row.string()?);
            row.finish()?;
        }
    }

    for mut row in reader.section("types", "type")? {
        row.keyword("type")?;
        let name = row.string()?;
        let ty = row.type_ref()?;
        row.finish()?;
        spec.types.push(TypeDef { name, ty });
    }

    for mut row in reader.section("attrs", "attr")? {
        spec.attrs.push(row.attr()?);
    }

    let enum_count = reader.section_header("enums")?;
    for _ in 0..enum_count {
        let mut row = reader.row("truncated enum section", "invalid enum row")?;
        row.keyword("enum")?;
        let name = row.string()?;
        let value_count: usize = row.number()?;
        row.finish()?;
        let mut values = Vec::new();
        for _ in 0..value_count {
            let mut row = reader.row("truncated enum value section", "invalid enum value row")?;
            row.keyword("enum_value")?;
            let value = row.number()?;
            let name = row.string()?;
            row.finish()?;
            values.push(EnumValue { value, name });
        }
        spec.enums.push(EnumDef { name, values });
    }

    for mut row in reader.section("instances", "instance")? {
        spec.instances.push(row.instance()?);
    }

    for mut row in reader.section("validations", "validation")? {
        row.keyword("validation")?;
        let target = row.string()?;
        let condition = row.expr()?;
        let message = row.string()?;
        row.finish()?;
        spec.validations.push(Validation {
            target,
            condition,
            message,
        });
    }

    let (line_no, line) = reader.next_line();
    if line.map(str::trim) != Some(END) {
        return Err(Error::malformed(line_no, line.unwrap_or(""), "missing end marker"));
    }
    trace!("Deserialized spec {:?} ({} lines)", spec.name, line_no);
    Ok(spec)
}

struct Reader<'a> {
    lines: Lines<'a>,
    line_no: usize,
    peeked: Option<Option<&'a str>>,
}

impl<'a> Reader<'a> {
    /// The next line and its 1-based number, `None` at the end of the input.
    fn next_line(&mut self) -> (usize, Option<&'a str>) {
        let line = match self.peeked.take() {
            Some(line) => line,
            None => self.lines.next(),
        };
        self.line_no += 1;
        (self.line_no, line)
    }

    fn peek_keyword(&mut self) -> Option<&'a str> {
        let lines = &mut self.lines;
        let line = *self.peeked.get_or_insert_with(|| lines.next());
        line.and_then(|l| l.split_whitespace().next())
    }

    /// Read and tokenize the next line. `missing` is the error when the input ended, `invalid`
    /// when the row cannot be tokenized.
    fn row(&mut self, missing: &str, invalid: &str) -> Result<Row<'a>, Error> {
        let (line_no, line) = self.next_line();
        let line = line.ok_or_else(|| Error::malformed(line_no, "", missing))?;
        let tokens = shell_words::split(line)
            .map_err(|_| Error::malformed(line_no, line, invalid))?;
        trace!("IR row {}: {:?}", line_no, tokens);
        Ok(Row {
            line_no,
            text: line,
            invalid: invalid.to_string(),
            tokens: tokens.into_iter(),
        })
    }

    fn section_header(&mut self, name: &str) -> Result<usize, Error> {
        let missing = format!("missing section header: {name}");
        let invalid = format!("invalid section header: {name}");
        let mut row = self.row(&missing, &invalid)?;
        row.keyword(name)?;
        let count = row.number()?;
        row.finish()?;
        Ok(count)
    }

    /// Read a section header and all the rows it announces.
    fn section(&mut self, name: &str, row_kind: &str) -> Result<Vec<Row<'a>>, Error> {
        let count = self.section_header(name)?;
        let truncated = format!("truncated {row_kind} section");
        let invalid = format!("invalid {row_kind} row");
        (0..count).map(|_| self.row(&truncated, &invalid)).collect()
    }
}

struct Row<'a> {
    line_no: usize,
    text: &'a str,
    invalid: String,
    tokens: IntoIter<String>,
}

impl Row<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.line_no, self.text, message)
    }

    fn invalid(&self) -> Error {
        self.error(self.invalid.clone())
    }

    fn token(&mut self) -> Result<String, Error> {
        self.tokens.next().ok_or_else(|| self.invalid())
    }

    fn has_more(&self) -> bool {
        self.tokens.len() > 0
    }

    fn finish(&self) -> Result<(), Error> {
        if self.has_more() {
            return Err(self.invalid());
        }
        Ok(())
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), Error> {
        if self.token()? != keyword {
            return Err(self.invalid());
        }
        Ok(())
    }

    fn string(&mut self) -> Result<String, Error> {
        self.token()
    }

    /// A keyword-like value whose parse error is reported as is.
    fn parse<T>(&mut self) -> Result<T, Error>
    where
        T: std::str::FromStr<Err = String>,
    {
        let token = self.token()?;
        token.parse().map_err(|e: String| self.error(e))
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T, Error> {
        let token = self.token()?;
        token.parse().map_err(|_| self.invalid())
    }

    fn expr(&mut self) -> Result<Expr, Error> {
        let token = self.token()?;
        Expr::parse(&token).map_err(|e| self.error(e))
    }

    fn opt_expr(&mut self) -> Result<Option<Expr>, Error> {
        let token = self.token()?;
        if token == NONE {
            return Ok(None);
        }
        Expr::parse(&token).map(Some).map_err(|e| self.error(e))
    }

    fn opt_string(&mut self) -> Result<Option<String>, Error> {
        let token = self.token()?;
        Ok((token != NONE).then_some(token))
    }

    fn opt_endian(&mut self) -> Result<Option<Endian>, Error> {
        let token = self.token()?;
        if token == NONE {
            return Ok(None);
        }
        token.parse().map(Some).map_err(|e: String| self.error(e))
    }

    fn type_ref(&mut self) -> Result<TypeRef, Error> {
        let kind = self.token()?;
        let payload = self.token()?;
        match kind.as_str() {
            "primitive" => payload
                .parse()
                .map(TypeRef::Primitive)
                .map_err(|e: String| self.error(e)),
            "user" => Ok(TypeRef::User(payload)),
            _ => Err(self.error(format!("unknown type reference kind: {kind}"))),
        }
    }

    fn attr(&mut self) -> Result<Attr, Error> {
        self.keyword("attr")?;
        let id = self.string()?;
        let ty = self.type_ref()?;
        let mut attr = Attr::new(id, ty);
        attr.endian = self.opt_endian()?;
        attr.size = self.opt_expr()?;
        // Older producers stop after the size or after the encoding.
        if !self.has_more() {
            return Ok(attr);
        }
        attr.enum_name = self.opt_string()?;
        attr.encoding = self.opt_string()?;
        if !self.has_more() {
            return Ok(attr);
        }
        attr.if_expr = self.opt_expr()?;
        attr.repeat = self.parse()?;
        attr.repeat_expr = self.opt_expr()?;
        attr.switch_on = self.opt_expr()?;
        let case_count: usize = self.number()?;
        for _ in 0..case_count {
            let matches = self.token()?;
            let ty = self.type_ref()?;
            let matches = if matches == ELSE {
                None
            } else {
                Some(Expr::parse(&matches).map_err(|e| self.error(e))?)
            };
            attr.switch_cases.push(SwitchCase { matches, ty });
        }
        if self.has_more() {
            attr.process = match self.token()?.as_str() {
                NONE => None,
                "xor_const" => {
                    let key = self.token()?;
                    let key = parse_xor_key(&key)
                        .ok_or_else(|| self.error(format!("invalid process: xor_const {key}")))?;
                    Some(Process::XorConst(key))
                }
                other => return Err(self.error(format!("invalid process: {other}"))),
            };
        }
        self.finish()?;
        Ok(attr)
    }

    fn instance(&mut self) -> Result<Instance, Error> {
        self.keyword("instance")?;
        let id = self.string()?;
        let kind = self.token()?;
        let kind = match kind.as_str() {
            "value" => InstanceKind::Value(self.expr()?),
            "parse" => InstanceKind::Parse(ParseInstance {
                ty: self.type_ref()?,
                endian: self.opt_endian()?,
                pos: self.opt_expr()?,
                size: self.opt_expr()?,
                encoding: self.opt_string()?,
            }),
            // Legacy rows carry the value expression right after the id.
            legacy => InstanceKind::Value(Expr::parse(legacy).map_err(|e| self.error(e))?),
        };
        self.finish()?;
        Ok(Instance { id, kind })
    }
}

/// Xor keys are bytes, written either in decimal or as `0x..` hexadecimal.
fn parse_xor_key(text: &str) -> Option<u8> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speculoos::prelude::*;

    fn minimal(body: &str) -> String {
        format!("KSIR1\nname \"m\"\ndefault_endian le\n{body}")
    }

    const EMPTY_SECTIONS: &str = "types 0\nattrs 0\nenums 0\ninstances 0\nvalidations 0\nend\n";

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(shell_words::split(&quote(r#"a"b\c $x"#)).unwrap(), vec![r#"a"b\c $x"#]);
    }

    #[test]
    fn test_imports_section_optional() {
        let spec = deserialize(&minimal(EMPTY_SECTIONS)).unwrap();
        assert!(spec.imports.is_empty());
        assert_eq!(spec.name, "m");
        // The serializer always writes the imports header.
        assert!(serialize(&spec).contains("imports 0\n"));
    }

    #[test]
    fn test_short_attr_rows() {
        let text = minimal(
            "types 0\nattrs 2\n\
             attr \"a\" primitive \"u2\" be \"none\"\n\
             attr \"s\" primitive \"str\" none \"(int 3)\" \"none\" \"ASCII\"\n\
             enums 0\ninstances 0\nvalidations 0\nend\n",
        );
        let spec = deserialize(&text).unwrap();
        assert_eq!(spec.attrs[0], Attr::new("a", PrimitiveType::U2).with_endian(Endian::Be));
        assert_eq!(
            spec.attrs[1],
            Attr::new("s", PrimitiveType::Str)
                .with_size(Expr::Int(3))
                .with_encoding("ASCII")
        );
    }

    #[test]
    fn test_legacy_instance_row() {
        let text = minimal(
            "types 0\nattrs 0\nenums 0\ninstances 1\n\
             instance \"two\" \"(int 2)\"\nvalidations 0\nend\n",
        );
        let spec = deserialize(&text).unwrap();
        assert_eq!(spec.instances, vec![Instance::value("two", Expr::Int(2))]);
        assert!(serialize(&spec).contains("instance \"two\" value \"(int 2)\"\n"));
    }

    #[test]
    fn test_process_row() {
        let text = minimal(
            "types 0\nattrs 1\n\
             attr \"p\" primitive \"bytes\" none \"(int 4)\" \"none\" \"none\" \"none\" none \"none\" \"none\" 0 xor_const 0xff\n\
             enums 0\ninstances 0\nvalidations 0\nend\n",
        );
        let spec = deserialize(&text).unwrap();
        assert_eq!(spec.attrs[0].process, Some(Process::XorConst(255)));
        assert!(serialize(&spec).contains(" 0 xor_const 255\n"));
    }

    fn message(text: &str) -> String {
        match deserialize_unchecked(text) {
            Err(Error::Malformed { message, .. }) => message,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_errors() {
        assert_eq!(message("KSIR2\n"), "missing KSIR1 header");
        assert_eq!(message("KSIR1\nnom \"x\"\n"), "invalid name line");
        assert_eq!(message("KSIR1\nname \"x\"\ndefault_endian middle\n"), "invalid endian: middle");
        assert_eq!(message(&minimal("")), "missing section header: types");
        assert_eq!(message(&minimal("types x\n")), "invalid section header: types");
        assert_eq!(message(&minimal("types 2\ntype \"a\" primitive \"u1\"\n")), "truncated type section");
        assert_eq!(
            message(&minimal("types 1\ntype \"a\" primitive \"u3\"\n")),
            "invalid primitive type: u3"
        );
        assert_eq!(
            message(&minimal("types 1\ntype \"a\" alias \"b\"\n")),
            "unknown type reference kind: alias"
        );
        assert_eq!(
            message(&minimal("types 0\nattrs 0\nenums 0\ninstances 0\nvalidations 0\n")),
            "missing end marker"
        );
    }

    #[test]
    fn test_error_location() {
        let err = deserialize_unchecked(&minimal("types 1\ntype \"a\" primitive \"u3\"\n"))
            .unwrap_err();
        match err {
            Error::Malformed { line, text, .. } => {
                assert_that!(line).is_equal_to(5);
                assert_that!(text.as_str()).is_equal_to("type \"a\" primitive \"u3\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
