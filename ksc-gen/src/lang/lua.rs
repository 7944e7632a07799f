//! The `lua` and `wireshark_lua` targets: one file with a class table per scope, optionally
//! followed by a Wireshark dissector feeding captured packets through the parser.

use std::path::PathBuf;

use itertools::Itertools;
use ksc_ir::{
    Attr, EnumDef, Expr, Instance, InstanceKind, PrimitiveType, Process, RepeatKind, TypeRef,
    Validation,
};

use crate::emit::{Artifact, EmitOptions};
use crate::error::Error;
use crate::expr::{render, ExprStyle, WithItem};
use crate::gen::*;
use crate::lang::{
    artifact, class_name, expected_literal, has_literal_cases, imported_types, read_method,
    Backend, DEFAULT_ENCODING,
};
use crate::resolve::{last_segment, split_path, Module, Scope, UserType};

type Text = std::result::Result<String, std::fmt::Error>;

#[derive(Debug)]
pub struct Lua {
    /// Append the Wireshark dissector wrapper.
    pub wireshark: bool,
}

impl Backend for Lua {
    fn name(&self) -> &'static str {
        if self.wireshark {
            "wireshark_lua"
        } else {
            "lua"
        }
    }

    fn render(
        &self,
        module: &Module,
        _options: &EmitOptions,
    ) -> std::result::Result<Vec<Artifact>, Error> {
        let lang = LuaScope {
            scope: module.root_scope(),
        };
        let file = LuaFile {
            wireshark: self.wireshark,
        };
        let path = if self.wireshark {
            format!("{}_wireshark.lua", module.name())
        } else {
            format!("{}.lua", module.name())
        };
        Ok(vec![artifact(self.name(), PathBuf::from(path), &file, &lang, "  ")?])
    }
}

/// The Lua rendering context of one scope.
struct LuaScope<'m> {
    scope: Scope<'m>,
}

impl<'m> LuaScope<'m> {
    fn module(&self) -> &'m Module<'m> {
        self.scope.module
    }

    fn children(&self) -> Vec<LuaScope<'m>> {
        let module = self.module();
        module
            .children(self.scope.path)
            .into_iter()
            .filter_map(|path| module.scope(path))
            .map(|scope| LuaScope { scope })
            .collect()
    }

    /// The class table of the scope `path`: `Top.Chunk.Header`.
    fn class_path(&self, path: &str) -> String {
        std::iter::once(self.module().name())
            .chain(split_path(path))
            .map(class_name)
            .join(".")
    }

    fn construct(&self, user: UserType<'m>) -> String {
        match user {
            UserType::Nested(path) => format!("{}(self._io, self, self._root)", self.class_path(path)),
            UserType::External(name) => format!("{}(self._io)", class_name(last_segment(name))),
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
            Some(size) => format!("self._io:read_bytes({})", self.expr(size)?),
            None => "self._io:read_bytes_full()".into(),
        })
    }

    fn str_read(&self, size: Option<&Expr>, encoding: Option<&str>) -> Text {
        Ok(match size {
            Some(size) => format!(
                "str_decode.decode(self._io:read_bytes({}), \"{}\")",
                self.expr(size)?,
                encoding.unwrap_or(DEFAULT_ENCODING)
            ),
            None => "\"\"".into(),
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
            _ => format!("self._io:{}()", read_method(primitive, endian)),
        };
        Ok(match &attr.enum_name {
            Some(reference) => format!("{}({read})", self.enum_ref(reference)),
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
            _ => Ok(format!("self._io:{}()", read_method(primitive, endian))),
        }
    }
}

impl ExprStyle for LuaScope<'_> {
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    /// Attrs and parse instances are fields, value instances are methods.
    fn name(&self, name: &str) -> String {
        match self.scope.spec.instance(name) {
            Some(instance) if matches!(instance.kind, InstanceKind::Value(_)) => {
                format!("self:{name}()")
            }
            Some(_) => format!("self.{name}"),
            None if self.scope.spec.attr(name).is_some() => format!("self.{name}"),
            None if matches!(name, "_root" | "_parent" | "_io") => format!("self.{name}"),
            None => name.to_string(),
        }
    }

    fn binary_op<'o>(&self, op: &'o str) -> &'o str {
        match op {
            "&&" => "and",
            "||" => "or",
            "!=" => "~=",
            "/" => "//",
            "^" => "~",
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

/// Whether any scope of the module declares an enum, and whether any reads a sized string.
fn runtime_needs(module: &Module) -> (bool, bool) {
    let mut enums = false;
    let mut strings = false;
    for scope in module.scopes() {
        enums |= !scope.spec.enums.is_empty();
        strings |= scope
            .spec
            .attrs
            .iter()
            .any(|a| sized_str(&scope, &a.ty, &a.size));
        strings |= scope
            .spec
            .instances
            .iter()
            .filter_map(|i| i.as_parse())
            .any(|p| sized_str(&scope, &p.ty, &p.size));
    }
    (enums, strings)
}

fn sized_str<'m>(scope: &Scope<'m>, ty: &'m TypeRef, size: &Option<Expr>) -> bool {
    size.is_some() && scope.primitive(ty) == Some(PrimitiveType::Str)
}

struct LuaFile {
    wireshark: bool,
}

impl Gen<LuaScope<'_>> for LuaFile {
    fn gen(&self, ctx: GenContext<LuaScope>) -> Result {
        let lang = ctx.lang;
        let module = lang.module();
        let (enums, strings) = runtime_needs(module);
        let mut requires = vec![];
        if enums {
            requires.push(Line("local enum = require(\"enum\")".to_string()));
        }
        if strings {
            requires.push(Line("local str_decode = require(\"string_decode\")".to_string()));
        }
        for (stem, _) in imported_types(module) {
            let require = format!("require(\"{stem}\")");
            if !requires.iter().any(|line| line.0 == require) {
                requires.push(Line(require));
            }
        }
        let wrapper = self.wireshark.then_some(Dissector);
        gen!(ctx, {
            "-- This is a generated file! Please edit source .ksy file and use kaitai-struct-compiler to rebuild";
            "--";
            "-- This file is compatible with Lua 5.3";
            ();
            "local class = require(\"class\")";
            "if _G[\"KaitaiStruct\"] == nil then require(\"kaitaistruct\") end";
            (&requires);
            (&LuaClass, &wrapper);
        })
    }
}

/// The class table of the current scope, then those of its nested scopes.
struct LuaClass;

impl Gen<LuaScope<'_>> for LuaClass {
    fn gen(&self, ctx: GenContext<LuaScope>) -> Result {
        let lang = ctx.lang;
        let spec = lang.scope.spec;
        let class = Raw(lang.class_path(lang.scope.path));
        let root = Line(if lang.scope.is_root() {
            "self._root = _root or self"
        } else {
            "self._root = _root"
        });
        let enums: Vec<_> = spec.enums.iter().map(LuaEnum).collect();
        let reads: Vec<_> = spec.attrs.iter().map(LuaAttrRead).collect();
        let checks: Vec<_> = spec.validations.iter().map(LuaValidation).collect();
        let instances: Vec<_> = spec.instances.iter().map(LuaInstance).collect();
        let children = lang.children();
        let nested: Vec<_> = children.iter().map(|scope| LuaNested { scope }).collect();

        gen!(ctx, {
            ();
            "{} = class.class(KaitaiStruct)" % &class;
            (&enums);
            ();
            "function {}:_init(io, _parent, _root)" % &class;
            ({
                "KaitaiStruct._init(self, io)";
                "self._parent = _parent";
                (&root);
                "self:_read()";
            });
            "end";
            ();
            "function {}:_read()" % &class;
            ({
                (&reads, &checks);
            });
            "end";
            (&instances, &nested);
        })
    }
}

struct LuaNested<'a, 'm> {
    scope: &'a LuaScope<'m>,
}

impl Gen<LuaScope<'_>> for LuaNested<'_, '_> {
    fn gen(&self, ctx: GenContext<LuaScope>) -> Result {
        LuaClass.gen(&mut ctx.with_lang(self.scope))
    }
}

struct LuaEnum<'a>(&'a EnumDef);

impl Gen<LuaScope<'_>> for LuaEnum<'_> {
    fn gen(&self, ctx: GenContext<LuaScope>) -> Result {
        let def = self.0;
        let lang = ctx.lang;
        let name = Raw(format!(
            "{}.{}",
            lang.class_path(lang.scope.path),
            class_name(def.short_name())
        ));
        let values: Vec<_> = def
            .values
            .iter()
            .map(|v| Line(format!("{} = {},", v.name, v.value)))
            .collect();
        gen!(ctx, {
            ();
            "{} = enum.Enum {{" % &name;
            ({
                (&values);
            });
            "}";
        })
    }
}

/// The statement storing one value of `attr` with `prefix`, dispatching on the switch if any.
struct LuaStore<'m> {
    attr: &'m Attr,
    prefix: String,
    process: Option<Process>,
}

impl<'m> Gen<LuaScope<'m>> for LuaStore<'m> {
    fn gen(&self, ctx: GenContext<LuaScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.attr;
        let prefix = &self.prefix;
        let Some(on) = &attr.switch_on else {
            let value = lang.value(attr, &attr.ty, self.process)?;
            return gen!(ctx, "{}{}" % (prefix, &value); ());
        };
        let mut branches = vec![];
        for case in &attr.switch_cases {
            let Some(matches) = &case.matches else {
                continue;
            };
            let keyword = if branches.is_empty() { "if" } else { "elseif" };
            let body = format!("{prefix}{}", lang.value(attr, &case.ty, self.process)?);
            branches.push(Branch {
                head: format!("{keyword} _on == {} then", lang.expr(matches)?),
                body,
            });
        }
        let fallback = match attr.switch_else() {
            Some(case) => Some(format!("{prefix}{}", lang.value(attr, &case.ty, self.process)?)),
            None if has_literal_cases(&attr.switch_cases) => None,
            None => Some("error(\"switch-on has no matching case\")".to_string()),
        };
        let on = Line(format!("local _on = {}", lang.expr(on)?));
        if branches.is_empty() {
            return gen!(ctx, (&on, &fallback.map(Line)));
        }
        if let Some(body) = fallback {
            branches.push(Branch {
                head: "else".into(),
                body,
            });
        }
        gen!(ctx, {
            (&on, &branches);
            "end";
        })
    }
}

/// The read of a sequence attr in `_read`.
struct LuaAttrRead<'m>(&'m Attr);

impl<'m> Gen<LuaScope<'m>> for LuaAttrRead<'m> {
    fn gen(&self, ctx: GenContext<LuaScope<'m>>) -> Result {
        let attr = self.0;
        match &attr.if_expr {
            Some(cond) => gen!(ctx, {
                "if {} then" % cond;
                ({
                    (&LuaAttrBody(attr));
                });
                "end";
            }),
            None => LuaAttrBody(attr).gen(ctx),
        }
    }
}

struct LuaAttrBody<'m>(&'m Attr);

impl<'m> Gen<LuaScope<'m>> for LuaAttrBody<'m> {
    fn gen(&self, ctx: GenContext<LuaScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        let field = format!("self.{}", attr.id);
        let append = LuaStore {
            attr,
            prefix: format!("{field}[#{field} + 1] = "),
            process: attr.process,
        };
        match attr.repeat {
            RepeatKind::None => match attr.process {
                Some(Process::XorConst(key)) => {
                    let raw = lang.bytes_read(attr.size.as_ref())?;
                    let id = Raw(&attr.id);
                    gen!(ctx, {
                        "self._raw_{} = {}" % (&id, &raw);
                        "self.{0} = KaitaiStream.process_xor_one(self._raw_{0}, {1})" % (&id, &Raw(key));
                    })
                }
                None => LuaStore {
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
                let item = LuaStore {
                    attr,
                    prefix: format!("{field}[i] = "),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = {{}}" % &field;
                    "for i = 1, {} do" % &count;
                    ({
                        (&item);
                    });
                    "end";
                })
            }
            RepeatKind::Eos => gen!(ctx, {
                "{} = {{}}" % &field;
                "while not self._io:is_eof() do";
                ({
                    (&append);
                });
                "end";
            }),
            RepeatKind::Until => {
                let until = match &attr.repeat_expr {
                    Some(expr) => gen_string(
                        &WithItem {
                            expr,
                            item: "repeat_item",
                        },
                        lang,
                        "",
                    )?,
                    None => "true".into(),
                };
                // A switch assigns in its branches, so the local must outlive them.
                let (declare, prefix) = match attr.switch_on {
                    Some(_) => (Some(Line("local repeat_item".to_string())), "repeat_item = "),
                    None => (None, "local repeat_item = "),
                };
                let item = LuaStore {
                    attr,
                    prefix: prefix.into(),
                    process: attr.process,
                };
                gen!(ctx, {
                    "{} = {{}}" % &field;
                    "while true do";
                    ({
                        (&declare, &item);
                        "{0}[#{0} + 1] = repeat_item" % &field;
                        "if {} then" % &until;
                        ({
                            "break";
                        });
                        "end";
                    });
                    "end";
                })
            }
        }
    }
}

struct LuaValidation<'m>(&'m Validation);

impl<'m> Gen<LuaScope<'m>> for LuaValidation<'m> {
    fn gen(&self, ctx: GenContext<LuaScope<'m>>) -> Result {
        let lang = ctx.lang;
        let validation = self.0;
        let target = Raw(&validation.target);
        if let Some(expected) = expected_literal(&lang.scope, validation) {
            let expected = Raw(expected);
            return gen!(ctx, {
                "if not(self.{} == {}) then" % (&target, &expected);
                ({
                    "error(\"not equal, expected \" .. {} .. \", but got \" .. self.{})" % (&expected, &target);
                });
                "end";
            });
        }
        gen!(ctx, {
            "if not({}) then" % &validation.condition;
            ({
                "error(\"validation failed: /valid/{}\")" % &target;
            });
            "end";
        })
    }
}

/// A lazily evaluated instance: a property for parse instances, a method for value ones.
struct LuaInstance<'m>(&'m Instance);

impl<'m> Gen<LuaScope<'m>> for LuaInstance<'m> {
    fn gen(&self, ctx: GenContext<LuaScope<'m>>) -> Result {
        let lang = ctx.lang;
        let instance = self.0;
        let id = Raw(&instance.id);
        let class = Raw(lang.class_path(lang.scope.path));
        match &instance.kind {
            InstanceKind::Value(expr) => gen!(ctx, {
                ();
                "function {}:{}()" % (&class, &id);
                ({
                    "if self._m_{0} ~= nil then return self._m_{0} end" % &id;
                    "self._m_{} = {}" % (&id, expr);
                    "return self._m_{}" % &id;
                });
                "end";
            }),
            InstanceKind::Parse(parse) => {
                let read = lang.instance_read(instance)?;
                let seek = match &parse.pos {
                    Some(pos) => Some(Line(format!("self._io:seek({})", lang.expr(pos)?))),
                    None => None,
                };
                gen!(ctx, {
                    ();
                    "{}.property.{} = {{}}" % (&class, &id);
                    "function {}.property.{}:get()" % (&class, &id);
                    ({
                        "if self._m_{} ~= nil then" % &id;
                        ({
                            "return self._m_{}" % &id;
                        });
                        "end";
                        ();
                        "local _pos = self._io:pos()";
                        (&seek);
                        "self._m_{} = {}" % (&id, &read);
                        "self._io:seek(_pos)";
                        "return self._m_{}" % &id;
                    });
                    "end";
                })
            }
        }
    }
}

/// The Wireshark protocol dissector wrapping the root class.
struct Dissector;

impl Gen<LuaScope<'_>> for Dissector {
    fn gen(&self, ctx: GenContext<LuaScope>) -> Result {
        let lang = ctx.lang;
        let name = Raw(lang.module().name());
        let class = Raw(class_name(lang.module().name()));
        gen!(ctx, {
            ();
            "-- Wireshark Lua dissector";
            "local {0}_proto = Proto(\"{0}\", \"{1}\")" % (&name, &class);
            ();
            "function {}_proto.dissector(tvb, pinfo, tree)" % &name;
            ({
                "pinfo.cols.protocol = \"{}\"" % &class;
                "local subtree = tree:add({}_proto, tvb())" % &name;
                "local status, parsed = pcall(function()";
                ({
                    "return {}:from_string(tvb:range():string())" % &class;
                });
                "end)";
                "if not status then";
                ({
                    "subtree:add_expert_info(PI_MALFORMED, PI_ERROR, \"Kaitai Struct parse error: \" .. parsed)";
                });
                "end";
            });
            "end";
            ();
            "-- Register the dissector on the desired port by setting this.";
            "local {}_proto_default_port = 0" % &name;
            "if {}_proto_default_port > 0 then" % &name;
            ({
                "DissectorTable.get(\"tcp.port\"):add({0}_proto_default_port, {0}_proto)" % &name;
            });
            "end";
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksc_ir::{Endian, Spec, SwitchCase};
    use speculoos::prelude::*;

    fn lua(spec: &Spec, wireshark: bool) -> String {
        let module = Module::new(spec).unwrap();
        let lang = LuaScope {
            scope: module.root_scope(),
        };
        gen_string(&LuaFile { wireshark }, &lang, "  ").unwrap()
    }

    fn sample() -> Spec {
        let mut spec = Spec::new("pkt", Endian::Be);
        spec.attrs.push(Attr::new("len", PrimitiveType::U2));
        spec.attrs.push(
            Attr::new("payload", PrimitiveType::Bytes)
                .with_size(Expr::name("len"))
                .with_process(Process::XorConst(0x55)),
        );
        spec.instances.push(Instance::value(
            "odd",
            Expr::binary("!=", Expr::binary("%", Expr::name("len"), Expr::Int(2)), Expr::Int(0)),
        ));
        spec
    }

    #[test]
    fn test_class_and_reads() {
        let out = lua(&sample(), false);
        assert_that!(out).contains("local class = require(\"class\")\n");
        assert_that!(out).contains("\nPkt = class.class(KaitaiStruct)\n");
        assert_that!(out).contains("function Pkt:_init(io, _parent, _root)\n  KaitaiStruct._init(self, io)\n");
        assert_that!(out).contains("  self.len = self._io:read_u2be()\n");
        assert_that!(out).contains("  self._raw_payload = self._io:read_bytes(self.len)\n");
        assert_that!(out).contains(
            "  self.payload = KaitaiStream.process_xor_one(self._raw_payload, 85)\n",
        );
        assert_that!(out).contains(
            "function Pkt:odd()\n  if self._m_odd ~= nil then return self._m_odd end\n  self._m_odd = self.len % 2 ~= 0\n",
        );
        assert_that!(out).does_not_contain("Proto(");
    }

    #[test]
    fn test_wireshark_wrapper() {
        let out = lua(&sample(), true);
        assert_that!(out).contains("local pkt_proto = Proto(\"pkt\", \"Pkt\")\n");
        assert_that!(out).contains("    return Pkt:from_string(tvb:range():string())\n");
        assert_that!(out).contains(
            "    subtree:add_expert_info(PI_MALFORMED, PI_ERROR, \"Kaitai Struct parse error: \" .. parsed)\n",
        );
        assert_that!(out).ends_with(
            "local pkt_proto_default_port = 0\nif pkt_proto_default_port > 0 then\n  DissectorTable.get(\"tcp.port\"):add(pkt_proto_default_port, pkt_proto)\nend\n",
        );
    }

    #[test]
    fn test_until_and_switch() {
        let mut spec = Spec::new("rec", Endian::Le);
        spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
        spec.attrs.push(Attr::new("words", PrimitiveType::U2).with_repeat(
            RepeatKind::Until,
            Some(Expr::binary("==", Expr::name("_"), Expr::name("tag"))),
        ));
        spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
            Expr::name("tag"),
            vec![SwitchCase::on(Expr::name("tag"), PrimitiveType::U4)],
        ));
        let out = lua(&spec, false);
        assert_that!(out).contains(
            "  while true do\n    local repeat_item = self._io:read_u2le()\n    self.words[#self.words + 1] = repeat_item\n    if repeat_item == self.tag then\n      break\n    end\n  end\n",
        );
        assert_that!(out).contains(
            "  local _on = self.tag\n  if _on == self.tag then\n    self.body = self._io:read_u4le()\n  else\n    error(\"switch-on has no matching case\")\n  end\n",
        );
    }

    #[test]
    fn test_until_over_switch_declares_item_outside_branches() {
        let mut spec = Spec::new("rec", Endian::Le);
        spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
        spec.attrs.push(
            Attr::new("items", PrimitiveType::U1)
                .with_switch(
                    Expr::name("tag"),
                    vec![
                        SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
                        SwitchCase::on(Expr::Int(2), PrimitiveType::U2),
                    ],
                )
                .with_repeat(
                    RepeatKind::Until,
                    Some(Expr::binary("==", Expr::name("_"), Expr::Int(0))),
                ),
        );
        let out = lua(&spec, false);
        assert_that!(out).contains(
            "  while true do\n    local repeat_item\n    local _on = self.tag\n    if _on == 1 then\n      repeat_item = self._io:read_u1()\n",
        );
        assert_that!(out).contains("    elseif _on == 2 then\n      repeat_item = self._io:read_u2le()\n    end\n");
        assert_that!(out).contains(
            "    self.items[#self.items + 1] = repeat_item\n    if repeat_item == 0 then\n      break\n",
        );
        assert_that!(out).does_not_contain("local repeat_item = ");
    }
}
