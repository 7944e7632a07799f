//! The `python` target: one module with a `KaitaiStruct` class per scope.

use std::path::PathBuf;

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
pub struct Python;

impl Backend for Python {
    fn name(&self) -> &'static str {
        "python"
    }

    fn render(
        &self,
        module: &Module,
        options: &EmitOptions,
    ) -> std::result::Result<Vec<Artifact>, Error> {
        let mut path = PathBuf::new();
        if let Some(package) = &options.python_package {
            path.extend(package.split('.').filter(|part| !part.is_empty()));
        }
        path.push(format!("{}.py", module.name()));
        let lang = PyScope {
            scope: module.root_scope(),
        };
        Ok(vec![artifact(self.name(), path, &PyFile, &lang, "    ")?])
    }
}

/// The Python rendering context of one scope.
struct PyScope<'m> {
    scope: Scope<'m>,
}

impl<'m> PyScope<'m> {
    fn module(&self) -> &'m Module<'m> {
        self.scope.module
    }

    fn children(&self) -> Vec<PyScope<'m>> {
        let module = self.module();
        module
            .children(self.scope.path)
            .into_iter()
            .filter_map(|path| module.scope(path))
            .map(|scope| PyScope { scope })
            .collect()
    }

    /// The class of the scope `path`, qualified from the module level: `Top.Chunk.Header`.
    fn class_path(&self, path: &str) -> String {
        std::iter::once(self.module().name())
            .chain(split_path(path))
            .map(class_name)
            .collect::<Vec<_>>()
            .join(".")
    }

    fn class_ref(&self, user: UserType<'m>) -> String {
        match user {
            UserType::Nested(path) => self.class_path(path),
            UserType::External(name) => class_name(last_segment(name)),
        }
    }

    fn construct(&self, user: UserType<'m>) -> String {
        let class = self.class_ref(user);
        match user {
            UserType::Nested(_) => format!("{class}(self._io, self, self._root)"),
            UserType::External(_) => format!("{class}(self._io)"),
        }
    }

    fn enum_ref(&self, reference: &str) -> String {
        match self.scope.enum_owner(reference) {
            Some((owner, def)) => {
                format!("{}.{}", self.class_path(owner), class_name(def.short_name()))
            }
            None => class_name(ksc_ir::short_name(reference)),
        }
    }

    fn expr(&self, expr: &Expr) -> Text {
        render(expr, self)
    }

    fn bytes_read(&self, size: Option<&Expr>) -> Text {
        Ok(match size {
            Some(size) => format!("self._io.read_bytes({})", self.expr(size)?),
            None => "self._io.read_bytes_full()".into(),
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
                        format!("KaitaiStream.process_xor_one({raw}, {key})")
                    }
                    None => raw,
                }
            }
            PrimitiveType::Str => self.str_read(attr.size.as_ref(), attr.encoding.as_deref())?,
            _ => format!("self._io.{}()", read_method(primitive, endian)),
        };
        Ok(match &attr.enum_name {
            Some(reference) => format!(
                "KaitaiStream.resolve_enum({}, {read})",
                self.enum_ref(reference)
            ),
            None => read,
        })
    }

    fn str_read(&self, size: Option<&Expr>, encoding: Option<&str>) -> Text {
        Ok(match size {
            Some(size) => format!(
                "(self._io.read_bytes({})).decode(u\"{}\")",
                self.expr(size)?,
                encoding.unwrap_or(DEFAULT_ENCODING)
            ),
            None => "u\"\"".into(),
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
            _ => Ok(format!("self._io.{}()", read_method(primitive, endian))),
        }
    }
}

impl ExprStyle for PyScope<'_> {
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "True"
        } else {
            "False"
        }
    }

    fn name(&self, name: &str) -> String {
        if self.scope.is_member(name) || matches!(name, "_root" | "_parent" | "_io") {
            format!("self.{name}")
        } else {
            name.to_string()
        }
    }

    fn binary_op<'o>(&self, op: &'o str) -> &'o str {
        match op {
            "&&" => "and",
            "||" => "or",
            "/" => "//",
            other => other,
        }
    }

    fn prefix_op<'o>(&self, op: &'o str) -> &'o str {
        match op {
            "!" => "not ",
            other => other,
        }
    }
}

/// Whether any scope of the module has a validation, and whether any of them compares an attr
/// with a literal.
fn validation_kinds(module: &Module) -> (bool, bool) {
    let mut generic = false;
    let mut not_equal = false;
    for scope in module.scopes() {
        for validation in &scope.spec.validations {
            if expected_literal(&scope, validation).is_some() {
                not_equal = true;
            } else {
                generic = true;
            }
        }
    }
    (generic, not_equal)
}

struct PyFile;

impl Gen<PyScope<'_>> for PyFile {
    fn gen(&self, ctx: GenContext<PyScope>) -> Result {
        let module = ctx.lang.module();
        let mut names = vec!["KaitaiStruct", "KaitaiStream", "BytesIO"];
        let (generic, not_equal) = validation_kinds(module);
        if generic {
            names.push("ValidationExprError");
        }
        if not_equal {
            names.push("ValidationNotEqualError");
        }
        let names = Punctuated(names.into_iter().map(Raw).collect(), ", ");
        let int_enum = module
            .scopes()
            .any(|scope| !scope.spec.enums.is_empty())
            .then(|| Line("from enum import IntEnum"));
        let imports: Vec<_> = imported_types(module)
            .into_iter()
            .map(|(stem, name)| {
                Line(format!(
                    "from {stem} import {}",
                    class_name(last_segment(name))
                ))
            })
            .collect();
        gen!(ctx, {
            "# This is a generated file! Please edit source .ksy file and use kaitai-struct-compiler to rebuild";
            "# type: ignore";
            ();
            "import kaitaistruct";
            "from kaitaistruct import {}" % &names;
            (&int_enum);
            ();
            "if getattr(kaitaistruct, 'API_VERSION', (0, 9)) < (0, 11):";
            ({
                "raise Exception(\"Incompatible Kaitai Struct Python API: 0.11 or later is required, but you have %s\" % (kaitaistruct.__version__))";
            });
            ();
            (&imports, &blank_if(!imports.is_empty()));
            (&PyClass);
        })
    }
}

/// The class of the current scope, with its enums, nested classes and instances.
struct PyClass;

impl Gen<PyScope<'_>> for PyClass {
    fn gen(&self, ctx: GenContext<PyScope>) -> Result {
        let lang = ctx.lang;
        let spec = lang.scope.spec;
        let name = class_name(lang.scope.name());
        let path = lang.class_path(lang.scope.path);
        let root = if lang.scope.is_root() {
            "self._root = _root or self"
        } else {
            "self._root = _root"
        };
        let enums: Vec<_> = spec.enums.iter().map(PyEnum).collect();
        let reads: Vec<_> = spec.attrs.iter().map(PyAttrRead).collect();
        let checks: Vec<_> = spec.validations.iter().map(PyValidation).collect();
        let pass = (reads.is_empty() && checks.is_empty()).then(|| Line("pass"));
        let fetches: Vec<_> = spec
            .attrs
            .iter()
            .map(PyFetch::Attr)
            .chain(spec.instances.iter().map(PyFetch::Instance))
            .collect();
        let children = lang.children();
        let nested: Vec<_> = children.iter().map(|scope| PyNested { scope }).collect();
        let instances: Vec<_> = spec.instances.iter().map(PyInstance).collect();

        gen!(ctx, {
            "class {}(KaitaiStruct):" % &name;
            ({
                (&enums);
                "def __init__(self, _io, _parent=None, _root=None):";
                ({
                    "super({}, self).__init__(_io)" % &path;
                    "self._parent = _parent";
                    (&Line(root));
                    "self._read()";
                });
                ();
                "def _read(self):";
                ({
                    (&reads, &checks, &pass);
                });
                ();
                "def _fetch_instances(self):";
                ({
                    "pass";
                    (&fetches);
                });
                (&nested, &instances);
            });
        })
    }
}

/// A nested class, after an empty line.
struct PyNested<'a, 'm> {
    scope: &'a PyScope<'m>,
}

impl Gen<PyScope<'_>> for PyNested<'_, '_> {
    fn gen(&self, ctx: GenContext<PyScope>) -> Result {
        ctx.endl()?;
        PyClass.gen(&mut ctx.with_lang(self.scope))
    }
}

struct PyEnum<'a>(&'a EnumDef);

impl Gen<PyScope<'_>> for PyEnum<'_> {
    fn gen(&self, ctx: GenContext<PyScope>) -> Result {
        let def = self.0;
        let values: Vec<_> = def
            .values
            .iter()
            .map(|v| Line(format!("{} = {}", v.name, v.value)))
            .collect();
        gen!(ctx, {
            "class {}(IntEnum):" % &class_name(def.short_name());
            ({
                (&values);
            });
            ();
        })
    }
}

/// Where a value read by an attr statement goes.
struct Sink {
    prefix: String,
    suffix: &'static str,
}

impl Sink {
    fn assign(target: String) -> Self {
        Self {
            prefix: format!("{target} = "),
            suffix: "",
        }
    }

    fn append(list: &str) -> Self {
        Self {
            prefix: format!("{list}.append("),
            suffix: ")",
        }
    }
}

/// The statement storing one value of `attr` into `sink`, dispatching on the switch if any.
struct PyStore<'m> {
    attr: &'m Attr,
    sink: Sink,
    process: Option<Process>,
}

impl<'m> Gen<PyScope<'m>> for PyStore<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.attr;
        let Sink { prefix, suffix } = &self.sink;
        let Some(on) = &attr.switch_on else {
            let value = lang.value(attr, &attr.ty, self.process)?;
            return gen!(ctx, "{}{}{}" % (prefix, &value, &Raw(suffix)); ());
        };
        let on = Line(format!("_on = {}", lang.expr(on)?));
        let mut branches = vec![];
        for case in &attr.switch_cases {
            let Some(matches) = &case.matches else {
                continue;
            };
            let keyword = if branches.is_empty() { "if" } else { "elif" };
            branches.push(Branch {
                head: format!("{keyword} _on == {}:", lang.expr(matches)?),
                body: format!("{prefix}{}{suffix}", lang.value(attr, &case.ty, self.process)?),
            });
        }
        let fallback = match attr.switch_else() {
            Some(case) => format!("{prefix}{}{suffix}", lang.value(attr, &case.ty, self.process)?),
            None if has_literal_cases(&attr.switch_cases) => format!("{prefix}None{suffix}"),
            None => "raise Exception(u\"switch-on has no matching case\")".into(),
        };
        if branches.is_empty() {
            return gen!(ctx, (&on, &Line(fallback)));
        }
        branches.push(Branch {
            head: "else:".into(),
            body: fallback,
        });
        gen!(ctx, (&on, &branches))
    }
}

/// The read of a sequence attr in `_read`.
struct PyAttrRead<'m>(&'m Attr);

impl<'m> Gen<PyScope<'m>> for PyAttrRead<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let attr = self.0;
        match &attr.if_expr {
            Some(cond) => gen!(ctx, {
                "if {}:" % cond;
                ({
                    (&PyAttrBody(attr));
                });
            }),
            None => PyAttrBody(attr).gen(ctx),
        }
    }
}

struct PyAttrBody<'m>(&'m Attr);

impl<'m> Gen<PyScope<'m>> for PyAttrBody<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        let field = format!("self.{}", attr.id);
        match attr.repeat {
            RepeatKind::None => match attr.process {
                Some(Process::XorConst(key)) => {
                    let raw = lang.bytes_read(attr.size.as_ref())?;
                    gen!(ctx, {
                        "self._raw_{} = {}" % (&Raw(&attr.id), &raw);
                        "{0} = KaitaiStream.process_xor_one(self._raw_{1}, {2})" % (&field, &Raw(&attr.id), &Raw(key));
                    })
                }
                None => PyStore {
                    attr,
                    sink: Sink::assign(field),
                    process: None,
                }
                .gen(ctx),
            },
            RepeatKind::Expr => {
                let count = match &attr.repeat_expr {
                    Some(count) => lang.expr(count)?,
                    None => "0".into(),
                };
                let store = PyStore {
                    attr,
                    sink: Sink::append(&field),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = []" % &field;
                    "for i in range({}):" % &count;
                    ({
                        (&store);
                    });
                })
            }
            RepeatKind::Eos => {
                let store = PyStore {
                    attr,
                    sink: Sink::append(&field),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = []" % &field;
                    "i = 0";
                    "while not self._io.is_eof():";
                    ({
                        (&store);
                        "i += 1";
                    });
                })
            }
            RepeatKind::Until => {
                let until = match &attr.repeat_expr {
                    Some(until) => lang.expr(until)?,
                    None => "True".into(),
                };
                let store = PyStore {
                    attr,
                    sink: Sink::assign("_".into()),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = []" % &field;
                    "i = 0";
                    "while True:";
                    ({
                        (&store);
                        "{}.append(_)" % &field;
                        "i += 1";
                        "if {}:" % &until;
                        ({
                            "break";
                        });
                    });
                })
            }
        }
    }
}

struct PyValidation<'m>(&'m Validation);

impl<'m> Gen<PyScope<'m>> for PyValidation<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let lang = ctx.lang;
        let validation = self.0;
        let target = Raw(&validation.target);
        if let Some(expected) = expected_literal(&lang.scope, validation) {
            let index = Raw(lang.scope.attr_index(&validation.target).unwrap_or(0));
            let expected = Raw(expected);
            return gen!(ctx, {
                "if not self.{} == {}:" % (&target, &expected);
                ({
                    "raise ValidationNotEqualError({}, self.{}, self._io, u\"/seq/{}\")" % (&expected, &target, &index);
                });
            });
        }
        gen!(ctx, {
            "if not ({}):" % &validation.condition;
            ({
                "raise ValidationExprError(self.{}, self._io, u\"/valid/{}\")" % (&target, &target);
            });
        })
    }
}

/// The recursive instance fetch of one member in `_fetch_instances`.
enum PyFetch<'m> {
    Attr(&'m Attr),
    Instance(&'m Instance),
}

impl<'m> Gen<PyScope<'m>> for PyFetch<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let lang = ctx.lang;
        match self {
            PyFetch::Attr(attr) => {
                let nested = matches!(lang.scope.attr_user_type(attr), Some(UserType::Nested(_)));
                let id = Raw(&attr.id);
                match (attr.repeat, nested) {
                    (RepeatKind::None, true) => gen!(ctx, "self.{}._fetch_instances()" % &id; ()),
                    (RepeatKind::None, false) => Ok(()),
                    (_, true) => gen!(ctx, {
                        "for i in range(len(self.{})):" % &id;
                        ({
                            "self.{}[i]._fetch_instances()" % &id;
                        });
                    }),
                    (_, false) => gen!(ctx, {
                        "for i in range(len(self.{})):" % &id;
                        ({
                            "pass";
                        });
                    }),
                }
            }
            PyFetch::Instance(instance) => {
                let nested = instance
                    .as_parse()
                    .and_then(|parse| lang.scope.user_type(&parse.ty))
                    .is_some_and(|user| matches!(user, UserType::Nested(_)));
                let id = Raw(&instance.id);
                let body = if nested {
                    Line(format!("self._m_{}._fetch_instances()", instance.id))
                } else {
                    Line("pass".to_string())
                };
                gen!(ctx, {
                    "_ = self.{}" % &id;
                    "if hasattr(self, '_m_{}'):" % &id;
                    ({
                        (&body);
                    });
                })
            }
        }
    }
}

/// A lazily evaluated property.
struct PyInstance<'m>(&'m Instance);

impl<'m> Gen<PyScope<'m>> for PyInstance<'m> {
    fn gen(&self, ctx: GenContext<PyScope<'m>>) -> Result {
        let lang = ctx.lang;
        let instance = self.0;
        let id = Raw(&instance.id);
        gen!(ctx, {
            ();
            "@property";
            "def {}(self):" % &id;
            ({
                "if hasattr(self, '_m_{}'):" % &id;
                ({
                    "return self._m_{}" % &id;
                });
                ();
                || match &instance.kind {
                    InstanceKind::Value(expr) => gen!(ctx, "self._m_{} = {}" % (&id, expr); ()),
                    InstanceKind::Parse(parse) => {
                        let read = lang.instance_read(instance)?;
                        let seek = match &parse.pos {
                            Some(pos) => Some(Line(format!("self._io.seek({})", lang.expr(pos)?))),
                            None => None,
                        };
                        gen!(ctx, {
                            "_pos = self._io.pos()";
                            (&seek);
                            "self._m_{} = {}" % (&id, &read);
                            "self._io.seek(_pos)";
                        })
                    }
                };
                "return getattr(self, '_m_{}', None)" % &id;
            });
        })
    }
}
