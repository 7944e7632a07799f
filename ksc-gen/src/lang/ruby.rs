//! The `ruby` target: one file with a `Kaitai::Struct::Struct` class per scope.

use std::path::PathBuf;

use heck::ToShoutySnakeCase;
use itertools::Itertools;
use ksc_ir::{
    Attr, EnumDef, Expr, Instance, InstanceKind, PrimitiveType, Process, RepeatKind, TypeRef,
    Validation,
};

use crate::emit::{Artifact, EmitOptions};
use crate::error::Error;
use crate::expr::{render, ExprStyle};
use crate::gen::*;
use crate::lang::{
    artifact, class_name, expected_literal, has_literal_cases, imported_types, read_method,
    Backend, DEFAULT_ENCODING,
};
use crate::resolve::{last_segment, split_path, Module, Scope, UserType};

type Text = std::result::Result<String, std::fmt::Error>;

#[derive(Debug)]
pub struct Ruby;

impl Backend for Ruby {
    fn name(&self) -> &'static str {
        "ruby"
    }

    fn render(
        &self,
        module: &Module,
        _options: &EmitOptions,
    ) -> std::result::Result<Vec<Artifact>, Error> {
        let lang = RbScope {
            scope: module.root_scope(),
        };
        let path = PathBuf::from(format!("{}.rb", module.name()));
        Ok(vec![artifact(self.name(), path, &RbFile, &lang, "  ")?])
    }
}

/// The Ruby rendering context of one scope.
struct RbScope<'m> {
    scope: Scope<'m>,
}

impl<'m> RbScope<'m> {
    fn module(&self) -> &'m Module<'m> {
        self.scope.module
    }

    fn children(&self) -> Vec<RbScope<'m>> {
        let module = self.module();
        module
            .children(self.scope.path)
            .into_iter()
            .filter_map(|path| module.scope(path))
            .map(|scope| RbScope { scope })
            .collect()
    }

    /// The class of the scope `path`, qualified from the top level: `Top::Chunk::Header`.
    fn class_path(&self, path: &str) -> String {
        std::iter::once(self.module().name())
            .chain(split_path(path))
            .map(class_name)
            .join("::")
    }

    fn construct(&self, user: UserType<'m>) -> String {
        match user {
            UserType::Nested(path) => format!("{}.new(@_io, self, @_root)", self.class_path(path)),
            UserType::External(name) => format!("{}.new(@_io)", class_name(last_segment(name))),
        }
    }

    fn enum_ref(&self, reference: &str) -> String {
        match self.scope.enum_owner(reference) {
            Some((owner, def)) => format!(
                "{}::{}",
                self.class_path(owner),
                enum_constant(def.short_name())
            ),
            None => enum_constant(ksc_ir::short_name(reference)),
        }
    }

    fn expr(&self, expr: &Expr) -> Text {
        render(expr, self)
    }

    fn bytes_read(&self, size: Option<&Expr>) -> Text {
        Ok(match size {
            Some(size) => format!("@_io.read_bytes({})", self.expr(size)?),
            None => "@_io.read_bytes_full".into(),
        })
    }

    fn str_read(&self, size: Option<&Expr>, encoding: Option<&str>) -> Text {
        Ok(match size {
            Some(size) => format!(
                "(@_io.read_bytes({})).force_encoding(\"{}\").encode('UTF-8')",
                self.expr(size)?,
                encoding.unwrap_or(DEFAULT_ENCODING)
            ),
            None => "''".into(),
        })
    }

    /// One value of `attr` read as `ty`: the attr type or the type of a switch case.
    fn value(&self, attr: &'m Attr, ty: &'m TypeRef, process: Option<Process>) -> Text {
        if attr.switch_on.is_none() {
            if let Some(user) = self.scope.user_type(ty) {
                return Ok(self.construct(user));
            }
        }
        let primitive = self.scope.case_primitive(ty);
        let endian = attr.endian.unwrap_or(self.scope.spec.default_endian);
        let read = match primitive {
            PrimitiveType::Bytes => {
                let raw = self.bytes_read(attr.size.as_ref())?;
                match process {
                    Some(Process::XorConst(key)) => {
                        format!("Kaitai::Struct::Stream::process_xor_one({raw}, {key})")
                    }
                    None => raw,
                }
            }
            PrimitiveType::Str => self.str_read(attr.size.as_ref(), attr.encoding.as_deref())?,
            _ => format!("@_io.{}", read_method(primitive, endian)),
        };
        Ok(match &attr.enum_name {
            Some(reference) => format!(
                "Kaitai::Struct::Stream::resolve_enum({}, {read})",
                self.enum_ref(reference)
            ),
            None => read,
        })
    }

    fn instance_read(&self, instance: &'m Instance) -> Text {
        let InstanceKind::Parse(parse) = &instance.kind else {
            return Ok(String::new());
        };
        if let Some(user) = self.scope.user_type(&parse.ty) {
            return Ok(self.construct(user));
        }
        let primitive = self.scope.case_primitive(&parse.ty);
        let endian = parse.endian.unwrap_or(self.scope.spec.default_endian);
        match primitive {
            PrimitiveType::Bytes => self.bytes_read(parse.size.as_ref()),
            PrimitiveType::Str => self.str_read(parse.size.as_ref(), parse.encoding.as_deref()),
            _ => Ok(format!("@_io.{}", read_method(primitive, endian))),
        }
    }
}

impl ExprStyle for RbScope<'_> {
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    fn name(&self, name: &str) -> String {
        name.to_string()
    }
}

/// The constant holding the values of an enum: `file_kind` becomes `FILE_KIND`.
fn enum_constant(name: &str) -> String {
    name.to_shouty_snake_case()
}

struct RbFile;

impl Gen<RbScope<'_>> for RbFile {
    fn gen(&self, ctx: GenContext<RbScope>) -> Result {
        let module = ctx.lang.module();
        let mut requires: Vec<Line<String>> = vec![];
        for (stem, _) in imported_types(module) {
            let require = format!("require '{stem}'");
            if !requires.iter().any(|line| line.0 == require) {
                requires.push(Line(require));
            }
        }
        gen!(ctx, {
            "# This is a generated file! Please edit source .ksy file and use kaitai-struct-compiler to rebuild";
            ();
            "require 'kaitai/struct/struct'";
            (&requires);
            ();
            "unless Gem::Version.new(Kaitai::Struct::VERSION) >= Gem::Version.new('0.11')";
            ({
                "raise \"Incompatible Kaitai Struct Ruby API: 0.11 or later is required, but you have #{Kaitai::Struct::VERSION}\"";
            });
            "end";
            ();
            (&RbClass);
        })
    }
}

/// The class of the current scope, with its enums, nested classes and instances.
struct RbClass;

impl Gen<RbScope<'_>> for RbClass {
    fn gen(&self, ctx: GenContext<RbScope>) -> Result {
        let lang = ctx.lang;
        let spec = lang.scope.spec;
        let name = class_name(lang.scope.name());
        let root = Raw(if lang.scope.is_root() {
            "_root || self"
        } else {
            "_root"
        });
        let enums: Vec<_> = spec.enums.iter().map(RbEnum).collect();
        let reads: Vec<_> = spec.attrs.iter().map(RbAttrRead).collect();
        let checks: Vec<_> = spec.validations.iter().map(RbValidation).collect();
        let children = lang.children();
        let nested: Vec<_> = children.iter().map(|scope| RbNested { scope }).collect();
        let instances: Vec<_> = spec.instances.iter().map(RbInstance).collect();
        let readers: Vec<_> = spec
            .attrs
            .iter()
            .map(|attr| Line(format!("attr_reader :{}", attr.id)))
            .collect();

        gen!(ctx, {
            "class {} < Kaitai::Struct::Struct" % &name;
            ({
                (&enums);
                ();
                "def initialize(_io, _parent = nil, _root = nil)";
                ({
                    "super(_io, _parent, {})" % &root;
                    "_read";
                });
                "end";
                ();
                "def _read";
                ({
                    (&reads, &checks);
                    "self";
                });
                "end";
                (&nested, &instances);
                (&blank_if(!readers.is_empty()), &readers);
            });
            "end";
        })
    }
}

struct RbNested<'a, 'm> {
    scope: &'a RbScope<'m>,
}

impl Gen<RbScope<'_>> for RbNested<'_, '_> {
    fn gen(&self, ctx: GenContext<RbScope>) -> Result {
        ctx.endl()?;
        RbClass.gen(&mut ctx.with_lang(self.scope))
    }
}

/// An enum as a hash constant from value to symbol, with its inverse.
struct RbEnum<'a>(&'a EnumDef);

impl Gen<RbScope<'_>> for RbEnum<'_> {
    fn gen(&self, ctx: GenContext<RbScope>) -> Result {
        let def = self.0;
        let constant = Raw(enum_constant(def.short_name()));
        let entries: Vec<_> = def
            .values
            .iter()
            .map(|v| Line(format!("{} => :{}_{},", v.value, def.short_name(), v.name)))
            .collect();
        gen!(ctx, {
            ();
            "{} = {{" % &constant;
            ({
                (&entries);
            });
            "}";
            "I__{0} = {0}.invert" % &constant;
        })
    }
}

/// The statement storing one value of `attr` with `prefix`, dispatching on the switch if any.
struct RbStore<'m> {
    attr: &'m Attr,
    prefix: String,
    process: Option<Process>,
}

impl<'m> Gen<RbScope<'m>> for RbStore<'m> {
    fn gen(&self, ctx: GenContext<RbScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.attr;
        let prefix = &self.prefix;
        let Some(on) = &attr.switch_on else {
            let value = lang.value(attr, &attr.ty, self.process)?;
            return gen!(ctx, "{}{}" % (prefix, &value); ());
        };
        let mut branches = vec![];
        for case in &attr.switch_cases {
            let head = match &case.matches {
                Some(matches) => format!("when {}", lang.expr(matches)?),
                None => "else".into(),
            };
            let body = format!("{prefix}{}", lang.value(attr, &case.ty, self.process)?);
            branches.push((case.matches.is_none(), Branch { head, body }));
        }
        // `else` goes last whatever its position among the cases.
        branches.sort_by_key(|(is_else, _)| *is_else);
        let mut branches: Vec<_> = branches.into_iter().map(|(_, branch)| branch).collect();
        if attr.switch_else().is_none() && !has_literal_cases(&attr.switch_cases) {
            branches.push(Branch {
                head: "else".into(),
                body: "raise \"switch-on has no matching case\"".into(),
            });
        }
        gen!(ctx, {
            "case {}" % &Raw(lang.expr(on)?);
            (&branches);
            "end";
        })
    }
}

/// The read of a sequence attr in `_read`.
struct RbAttrRead<'m>(&'m Attr);

impl<'m> Gen<RbScope<'m>> for RbAttrRead<'m> {
    fn gen(&self, ctx: GenContext<RbScope<'m>>) -> Result {
        let attr = self.0;
        match &attr.if_expr {
            Some(cond) => gen!(ctx, {
                "if {}" % cond;
                ({
                    (&RbAttrBody(attr));
                });
                "end";
            }),
            None => RbAttrBody(attr).gen(ctx),
        }
    }
}

struct RbAttrBody<'m>(&'m Attr);

impl<'m> Gen<RbScope<'m>> for RbAttrBody<'m> {
    fn gen(&self, ctx: GenContext<RbScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        let field = format!("@{}", attr.id);
        let append = RbStore {
            attr,
            prefix: format!("{field} << "),
            process: attr.process,
        };
        match attr.repeat {
            RepeatKind::None => match attr.process {
                Some(Process::XorConst(key)) => {
                    let raw = lang.bytes_read(attr.size.as_ref())?;
                    let id = Raw(&attr.id);
                    gen!(ctx, {
                        "@_raw_{} = {}" % (&id, &raw);
                        "@{0} = Kaitai::Struct::Stream::process_xor_one(@_raw_{0}, {1})" % (&id, &Raw(key));
                    })
                }
                None => RbStore {
                    attr,
                    prefix: format!("{field} = "),
                    process: None,
                }
                .gen(ctx),
            },
            RepeatKind::Expr => {
                let count = match &attr.repeat_expr {
                    Some(count) => lang.expr(count)?,
                    None => "0".into(),
                };
                gen!(ctx, {
                    "{} = []" % &field;
                    "({}).times {{ |i|" % &count;
                    ({
                        (&append);
                    });
                    "}";
                })
            }
            RepeatKind::Eos => gen!(ctx, {
                "{} = []" % &field;
                "i = 0";
                "while not @_io.eof?";
                ({
                    (&append);
                    "i += 1";
                });
                "end";
            }),
            RepeatKind::Until => {
                let until = match &attr.repeat_expr {
                    Some(until) => lang.expr(until)?,
                    None => "true".into(),
                };
                let item = RbStore {
                    attr,
                    prefix: "_ = ".into(),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = []" % &field;
                    "i = 0";
                    "loop do";
                    ({
                        (&item);
                        "{} << _" % &field;
                        "i += 1";
                        "break if {}" % &until;
                    });
                    "end";
                })
            }
        }
    }
}

struct RbValidation<'m>(&'m Validation);

impl<'m> Gen<RbScope<'m>> for RbValidation<'m> {
    fn gen(&self, ctx: GenContext<RbScope<'m>>) -> Result {
        let lang = ctx.lang;
        let validation = self.0;
        let target = Raw(&validation.target);
        if let Some(expected) = expected_literal(&lang.scope, validation) {
            let index = Raw(lang.scope.attr_index(&validation.target).unwrap_or(0));
            let expected = Raw(expected);
            return gen!(ctx, "raise Kaitai::Struct::ValidationNotEqualError.new({0}, @{1}, @_io, \"/seq/{2}\") if not @{1} == {0}" % (&expected, &target, &index); ());
        }
        gen!(ctx, "raise Kaitai::Struct::ValidationExprError.new(@{0}, @_io, '/valid/{0}') if !({1})" % (&target, &validation.condition); ())
    }
}

/// A lazily evaluated method memoized in an instance variable.
struct RbInstance<'m>(&'m Instance);

impl<'m> Gen<RbScope<'m>> for RbInstance<'m> {
    fn gen(&self, ctx: GenContext<RbScope<'m>>) -> Result {
        let lang = ctx.lang;
        let instance = self.0;
        let id = Raw(&instance.id);
        gen!(ctx, {
            ();
            "def {}" % &id;
            ({
                "return @{0} unless @{0}.nil?" % &id;
                || match &instance.kind {
                    InstanceKind::Value(expr) => gen!(ctx, "@{} = {}" % (&id, expr); ()),
                    InstanceKind::Parse(parse) => {
                        let read = lang.instance_read(instance)?;
                        let seek = match &parse.pos {
                            Some(pos) => Some(Line(format!("@_io.seek({})", lang.expr(pos)?))),
                            None => None,
                        };
                        gen!(ctx, {
                            "_pos = @_io.pos";
                            (&seek);
                            "@{} = {}" % (&id, &read);
                            "@_io.seek(_pos)";
                        })
                    }
                };
                "@{}" % &id;
            });
            "end";
        })
    }
}
