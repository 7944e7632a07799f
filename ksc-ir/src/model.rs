use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// Byte order of a multi-byte read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Endian {
    /// Little endian.
    #[default]
    Le,
    /// Big endian.
    Be,
}

impl Endian {
    /// The wire spelling of this endianness.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endian::Le => "le",
            Endian::Be => "be",
        }
    }
}

impl FromStr for Endian {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "le" => Ok(Endian::Le),
            "be" => Ok(Endian::Be),
            _ => Err(format!("invalid endian: {s}")),
        }
    }
}

impl Display for Endian {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The leaf types a field can be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    U1,
    U2,
    U4,
    U8,
    S1,
    S2,
    S4,
    S8,
    F4,
    F8,
    Str,
    Bytes,
}

impl PrimitiveType {
    /// All the primitive types, in wire order.
    pub const ALL: [PrimitiveType; 12] = [
        PrimitiveType::U1,
        PrimitiveType::U2,
        PrimitiveType::U4,
        PrimitiveType::U8,
        PrimitiveType::S1,
        PrimitiveType::S2,
        PrimitiveType::S4,
        PrimitiveType::S8,
        PrimitiveType::F4,
        PrimitiveType::F8,
        PrimitiveType::Str,
        PrimitiveType::Bytes,
    ];

    /// The wire spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::U1 => "u1",
            PrimitiveType::U2 => "u2",
            PrimitiveType::U4 => "u4",
            PrimitiveType::U8 => "u8",
            PrimitiveType::S1 => "s1",
            PrimitiveType::S2 => "s2",
            PrimitiveType::S4 => "s4",
            PrimitiveType::S8 => "s8",
            PrimitiveType::F4 => "f4",
            PrimitiveType::F8 => "f8",
            PrimitiveType::Str => "str",
            PrimitiveType::Bytes => "bytes",
        }
    }

    /// Whether this is one of the fixed-size integer types.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveType::U1
                | PrimitiveType::U2
                | PrimitiveType::U4
                | PrimitiveType::U8
                | PrimitiveType::S1
                | PrimitiveType::S2
                | PrimitiveType::S4
                | PrimitiveType::S8
        )
    }

    /// Whether the type has a single-byte representation, for which endianness does not matter.
    pub fn is_single_byte(&self) -> bool {
        matches!(self, PrimitiveType::U1 | PrimitiveType::S1)
    }

    /// Rank used to pick the storage of a field whose type depends on a switch: the widest rank
    /// wins. Variable-length types outrank every number.
    pub fn storage_rank(&self) -> u32 {
        match self {
            PrimitiveType::U1 | PrimitiveType::S1 => 1,
            PrimitiveType::U2 | PrimitiveType::S2 => 2,
            PrimitiveType::U4 | PrimitiveType::S4 | PrimitiveType::F4 => 4,
            PrimitiveType::U8 | PrimitiveType::S8 | PrimitiveType::F8 => 8,
            PrimitiveType::Str | PrimitiveType::Bytes => 100,
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrimitiveType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("invalid primitive type: {s}"))
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a type: either a primitive, or a named user type.
///
/// User names may be scope-qualified (`outer::inner`) or hold an embedded scope, see
/// [`TypeRef::embedded`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A primitive leaf type.
    Primitive(PrimitiveType),
    /// A user type, referenced by name.
    User(String),
}

impl TypeRef {
    /// Shorthand for a user type reference.
    pub fn user(name: impl Into<String>) -> Self {
        TypeRef::User(name.into())
    }

    /// The primitive type, if this is a primitive reference.
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            TypeRef::Primitive(p) => Some(*p),
            TypeRef::User(_) => None,
        }
    }

    /// The referenced name, if this is a user type reference.
    pub fn as_user(&self) -> Option<&str> {
        match self {
            TypeRef::Primitive(_) => None,
            TypeRef::User(name) => Some(name),
        }
    }
}

impl From<PrimitiveType> for TypeRef {
    fn from(p: PrimitiveType) -> Self {
        TypeRef::Primitive(p)
    }
}

/// A named alias of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// The alias name.
    pub name: String,
    /// What the alias points to.
    pub ty: TypeRef,
}

impl TypeDef {
    /// Make a new alias.
    pub fn new(name: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// How many times a sequence field is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RepeatKind {
    /// A single read.
    #[default]
    None,
    /// Read until the end of the stream.
    Eos,
    /// Read a number of times given by the repeat expression.
    Expr,
    /// Read until the repeat expression, evaluated on the last item, holds.
    Until,
}

impl RepeatKind {
    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatKind::None => "none",
            RepeatKind::Eos => "eos",
            RepeatKind::Expr => "expr",
            RepeatKind::Until => "until",
        }
    }

    /// Whether this kind needs a repeat expression.
    pub fn takes_expr(&self) -> bool {
        matches!(self, RepeatKind::Expr | RepeatKind::Until)
    }
}

impl FromStr for RepeatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RepeatKind::None),
            "eos" => Ok(RepeatKind::Eos),
            "expr" => Ok(RepeatKind::Expr),
            "until" => Ok(RepeatKind::Until),
            _ => Err(format!("invalid repeat kind: {s}")),
        }
    }
}

/// One arm of a switch-typed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// The value to match, `None` for the `else` arm.
    pub matches: Option<Expr>,
    /// The type read when this arm is selected.
    pub ty: TypeRef,
}

impl SwitchCase {
    /// An arm selected when the switch value equals `matches`.
    pub fn on(matches: Expr, ty: impl Into<TypeRef>) -> Self {
        Self {
            matches: Some(matches),
            ty: ty.into(),
        }
    }

    /// The fallback arm.
    pub fn otherwise(ty: impl Into<TypeRef>) -> Self {
        Self {
            matches: None,
            ty: ty.into(),
        }
    }
}

/// A byte transform applied right after reading the raw bytes of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Process {
    /// Every byte is xor-ed with a constant key.
    XorConst(u8),
}

/// A sequence field, read in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub id: String,
    pub ty: TypeRef,
    pub endian: Option<Endian>,
    pub size: Option<Expr>,
    pub enum_name: Option<String>,
    pub encoding: Option<String>,
    pub if_expr: Option<Expr>,
    pub repeat: RepeatKind,
    pub repeat_expr: Option<Expr>,
    pub switch_on: Option<Expr>,
    pub switch_cases: Vec<SwitchCase>,
    pub process: Option<Process>,
}

impl Attr {
    /// A plain field with no modifiers.
    pub fn new(id: impl Into<String>, ty: impl Into<TypeRef>) -> Self {
        Self {
            id: id.into(),
            ty: ty.into(),
            endian: None,
            size: None,
            enum_name: None,
            encoding: None,
            if_expr: None,
            repeat: RepeatKind::None,
            repeat_expr: None,
            switch_on: None,
            switch_cases: vec![],
            process: None,
        }
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = Some(endian);
        self
    }

    pub fn with_size(mut self, size: Expr) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_enum(mut self, enum_name: impl Into<String>) -> Self {
        self.enum_name = Some(enum_name.into());
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_if(mut self, cond: Expr) -> Self {
        self.if_expr = Some(cond);
        self
    }

    /// Set the repetition. `expr` is the count for [`RepeatKind::Expr`] and the stop condition for
    /// [`RepeatKind::Until`].
    pub fn with_repeat(mut self, repeat: RepeatKind, expr: Option<Expr>) -> Self {
        self.repeat = repeat;
        self.repeat_expr = expr;
        self
    }

    pub fn with_switch(mut self, on: Expr, cases: Vec<SwitchCase>) -> Self {
        self.switch_on = Some(on);
        self.switch_cases = cases;
        self
    }

    pub fn with_process(mut self, process: Process) -> Self {
        self.process = Some(process);
        self
    }

    /// The `else` arm of the switch, if any.
    pub fn switch_else(&self) -> Option<&SwitchCase> {
        self.switch_cases.iter().find(|c| c.matches.is_none())
    }
}

/// A single named value of an enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: i64,
    pub name: String,
}

/// An integer enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    /// The enum name, possibly scope-qualified.
    pub name: String,
    /// The values, in declaration order.
    pub values: Vec<EnumValue>,
}

impl EnumDef {
    /// Make an enum from `(value, name)` pairs.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (i64, S)>,
    ) -> Self {
        Self {
            name: name.into(),
            values: values
                .into_iter()
                .map(|(value, name)| EnumValue {
                    value,
                    name: name.into(),
                })
                .collect(),
        }
    }

    /// The name without any scope qualification.
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }
}

/// The last `::`-separated segment of a possibly qualified name.
pub fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Whether `declared` is `reference`, or ends with `::reference`.
pub fn matches_qualified(declared: &str, reference: &str) -> bool {
    declared == reference
        || declared
            .strip_suffix(reference)
            .is_some_and(|prefix| prefix.ends_with("::"))
}

/// Where a parse instance is read from and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseInstance {
    pub ty: TypeRef,
    pub endian: Option<Endian>,
    pub pos: Option<Expr>,
    pub size: Option<Expr>,
    pub encoding: Option<String>,
}

/// What an instance evaluates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceKind {
    /// Computed from an expression.
    Value(Expr),
    /// Read on demand at an arbitrary position of the stream.
    Parse(ParseInstance),
}

/// A lazily evaluated, cached field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub kind: InstanceKind,
}

impl Instance {
    /// A computed instance.
    pub fn value(id: impl Into<String>, expr: Expr) -> Self {
        Self {
            id: id.into(),
            kind: InstanceKind::Value(expr),
        }
    }

    /// A parse instance of the given type, read at the current position unless `pos` is given.
    pub fn parse(id: impl Into<String>, ty: impl Into<TypeRef>, pos: Option<Expr>) -> Self {
        Self {
            id: id.into(),
            kind: InstanceKind::Parse(ParseInstance {
                ty: ty.into(),
                endian: None,
                pos,
                size: None,
                encoding: None,
            }),
        }
    }

    /// The parse details, if this is a parse instance.
    pub fn as_parse(&self) -> Option<&ParseInstance> {
        match &self.kind {
            InstanceKind::Parse(p) => Some(p),
            InstanceKind::Value(_) => None,
        }
    }
}

/// A post-read check on a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// The checked attr or instance.
    pub target: String,
    /// Must evaluate to true.
    pub condition: Expr,
    pub message: String,
}

impl Validation {
    pub fn new(target: impl Into<String>, condition: Expr, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition,
            message: message.into(),
        }
    }
}

/// The intermediate representation of one binary format description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Spec {
    pub name: String,
    pub default_endian: Endian,
    /// Referenced IR files, as written by the front-end.
    pub imports: Vec<String>,
    pub types: Vec<TypeDef>,
    pub attrs: Vec<Attr>,
    pub enums: Vec<EnumDef>,
    pub instances: Vec<Instance>,
    pub validations: Vec<Validation>,
}

impl Spec {
    /// An empty spec with the given name.
    pub fn new(name: impl Into<String>, default_endian: Endian) -> Self {
        Self {
            name: name.into(),
            default_endian,
            ..Default::default()
        }
    }

    /// Search an attr by id.
    pub fn attr(&self, id: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.id == id)
    }

    /// Search an instance by id.
    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speculoos::prelude::*;

    #[test]
    fn test_primitive_from_str() {
        for p in PrimitiveType::ALL {
            assert_that!(p.as_str().parse::<PrimitiveType>()).is_ok_containing(p);
        }
        assert_that!("u3".parse::<PrimitiveType>())
            .is_err_containing("invalid primitive type: u3".to_string());
    }

    #[test]
    fn test_storage_rank_prefers_wider() {
        assert!(PrimitiveType::U4.storage_rank() > PrimitiveType::U1.storage_rank());
        assert!(PrimitiveType::Bytes.storage_rank() > PrimitiveType::F8.storage_rank());
    }

    #[test]
    fn test_qualified_match() {
        assert!(matches_qualified("animal", "animal"));
        assert!(matches_qualified("zoo::animal", "animal"));
        assert!(!matches_qualified("zooanimal", "animal"));
        assert!(!matches_qualified("animal", "zoo::animal"));
        assert_eq!(short_name("a::b::c"), "c");
        assert_eq!(short_name("c"), "c");
    }
}
