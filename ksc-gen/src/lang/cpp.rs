//! The `cpp_stl` target: a header and a source file using the C++/STL runtime.

use std::collections::HashMap;
use std::path::PathBuf;

use heck::ToShoutySnakeCase;
use ksc_ir::{
    Attr, EnumDef, Expr, Instance, InstanceKind, ParseInstance, PrimitiveType, Process,
    RepeatKind, SwitchCase, UnaryOp, Validation,
};

use crate::emit::{Artifact, EmitOptions};
use crate::error::Error;
use crate::expr::{is_boolean_op, normalize_op, ExprStyle, WithItem};
use crate::gen::*;
use crate::lang::{
    artifact, expected_literal, has_literal_cases, imported_types, read_method, Backend,
    DEFAULT_ENCODING,
};
use crate::resolve::{last_segment, parent_path, split_path, Module, Scope, UserType};

#[derive(Debug)]
pub struct CppStl;

impl Backend for CppStl {
    fn name(&self) -> &'static str {
        "cpp_stl"
    }

    fn render(
        &self,
        module: &Module,
        _options: &EmitOptions,
    ) -> std::result::Result<Vec<Artifact>, Error> {
        let lang = CppScope::new(module.root_scope());
        let name = module.name();
        Ok(vec![
            artifact(
                self.name(),
                PathBuf::from(format!("{name}.h")),
                &HeaderFile,
                &lang,
                "    ",
            )?,
            artifact(
                self.name(),
                PathBuf::from(format!("{name}.cpp")),
                &SourceFile,
                &lang,
                "    ",
            )?,
        ])
    }
}

/// The C++ name of a primitive field.
fn field_type(primitive: PrimitiveType) -> &'static str {
    match primitive {
        PrimitiveType::U1 => "uint8_t",
        PrimitiveType::U2 => "uint16_t",
        PrimitiveType::U4 => "uint32_t",
        PrimitiveType::U8 => "uint64_t",
        PrimitiveType::S1 => "int8_t",
        PrimitiveType::S2 => "int16_t",
        PrimitiveType::S4 => "int32_t",
        PrimitiveType::S8 => "int64_t",
        PrimitiveType::F4 => "float",
        PrimitiveType::F8 => "double",
        PrimitiveType::Str | PrimitiveType::Bytes => "std::string",
    }
}

/// The class of a structure defined outside the module: `a::b` becomes `a_t::b_t`.
fn user_type_name(name: &str) -> String {
    match name {
        "" | "struct" | "kaitai::kstruct" => "kaitai::kstruct".into(),
        _ => split_path(name)
            .iter()
            .map(|segment| format!("{segment}_t"))
            .collect::<Vec<_>>()
            .join("::"),
    }
}

/// The class of the nested scope `path` of the module `root`, qualified from the top level.
fn qualified_class(root: &str, path: &str) -> String {
    std::iter::once(root)
        .chain(split_path(path))
        .map(|segment| format!("{segment}_t"))
        .collect::<Vec<_>>()
        .join("::")
}

fn sanitize(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{out}")
    } else {
        out
    }
}

/// The `enum class` of an enum declared at the top level.
fn enum_class_name(name: &str) -> String {
    format!("{}_e", sanitize(ksc_ir::short_name(name)))
}

/// The constant of `value` in the enum `def` declared inside a class.
fn nested_enum_value(def: &EnumDef, value: &str) -> String {
    format!(
        "{}_{}",
        def.short_name().to_shouty_snake_case(),
        value.to_shouty_snake_case()
    )
}

/// The type of a value instance, from the types of the instances declared before it.
fn value_type(expr: &Expr, known: &HashMap<&str, &'static str>) -> &'static str {
    match expr {
        Expr::Bool(_) => "bool",
        Expr::Int(value) if (-128..=127).contains(value) => "int8_t",
        Expr::Name(name) => known.get(name.as_str()).copied().unwrap_or("int32_t"),
        Expr::Unary {
            op: UnaryOp::Prefix(op),
            ..
        } if normalize_op(op) == "!" => "bool",
        Expr::Binary { op, .. } if is_boolean_op(normalize_op(op)) => "bool",
        _ => "int32_t",
    }
}

/// The C++ rendering context of one scope.
struct CppScope<'m> {
    scope: Scope<'m>,
    value_types: HashMap<&'m str, &'static str>,
}

impl<'m> CppScope<'m> {
    fn new(scope: Scope<'m>) -> Self {
        let mut value_types = HashMap::new();
        for instance in &scope.spec.instances {
            if let InstanceKind::Value(expr) = &instance.kind {
                let ty = value_type(expr, &value_types);
                value_types.insert(instance.id.as_str(), ty);
            }
        }
        Self { scope, value_types }
    }

    fn module(&self) -> &'m Module<'m> {
        self.scope.module
    }

    fn children(&self) -> Vec<CppScope<'m>> {
        let module = self.module();
        module
            .children(self.scope.path)
            .into_iter()
            .filter_map(|path| module.scope(path))
            .map(CppScope::new)
            .collect()
    }

    fn class_name(&self) -> String {
        format!("{}_t", self.scope.name())
    }

    fn full_class(&self) -> String {
        qualified_class(self.module().name(), self.scope.path)
    }

    fn root_type(&self) -> String {
        format!("{}_t", self.module().name())
    }

    fn parent_ptr(&self) -> String {
        if self.scope.is_root() {
            "kaitai::kstruct*".into()
        } else {
            format!(
                "{}*",
                qualified_class(self.module().name(), parent_path(self.scope.path))
            )
        }
    }

    /// The class of a user type. Inside the class declaration a child or the class itself is
    /// named by its short name, unless `full` asks for the qualified one.
    fn type_token(&self, user: UserType<'m>, full: bool) -> String {
        match user {
            UserType::Nested(path) => {
                let local = parent_path(path) == self.scope.path || path == self.scope.path;
                if local && !full {
                    format!("{}_t", last_segment(path))
                } else {
                    qualified_class(self.module().name(), path)
                }
            }
            UserType::External(name) => user_type_name(name),
        }
    }

    fn enum_type(&self, reference: &str, full: bool) -> String {
        match self.scope.enum_owner(reference) {
            Some(("", def)) => enum_class_name(&def.name),
            Some((owner, def)) if owner == self.scope.path && !full => {
                format!("{}_t", def.short_name())
            }
            Some((owner, def)) => format!(
                "{}::{}_t",
                qualified_class(self.module().name(), owner),
                def.short_name()
            ),
            None => enum_class_name(reference),
        }
    }

    /// The type of one value of `attr`, as seen by user code.
    fn base_type(&self, attr: &'m Attr, full: bool) -> String {
        if let Some(reference) = &attr.enum_name {
            return self.enum_type(reference, full);
        }
        if let Some(user) = self.scope.attr_user_type(attr) {
            return format!("{}*", self.type_token(user, full));
        }
        field_type(self.scope.attr_primitive(attr).unwrap_or(PrimitiveType::U1)).into()
    }

    /// The type of one value of `attr` as stored in its class.
    fn element_type(&self, attr: &'m Attr) -> String {
        match self.scope.attr_user_type(attr) {
            Some(user) => format!("std::unique_ptr<{}>", self.type_token(user, false)),
            None => self.base_type(attr, false),
        }
    }

    fn storage_type(&self, attr: &'m Attr) -> String {
        if attr.repeat == RepeatKind::None {
            self.element_type(attr)
        } else {
            format!("std::unique_ptr<std::vector<{}>>", self.element_type(attr))
        }
    }

    fn accessor_type(&self, attr: &'m Attr) -> String {
        if attr.repeat == RepeatKind::None {
            self.base_type(attr, false)
        } else {
            format!("std::vector<{}>*", self.element_type(attr))
        }
    }

    fn instance_type(&self, instance: &'m Instance, full: bool) -> String {
        match &instance.kind {
            InstanceKind::Value(_) => self
                .value_types
                .get(instance.id.as_str())
                .copied()
                .unwrap_or("int32_t")
                .into(),
            InstanceKind::Parse(parse) => match self.scope.user_type(&parse.ty) {
                Some(user) => format!("{}*", self.type_token(user, full)),
                None => field_type(self.scope.case_primitive(&parse.ty)).into(),
            },
        }
    }

    /// Whether the storage of `attr` is a smart pointer.
    fn owns_pointer(&self, attr: &'m Attr) -> bool {
        attr.repeat != RepeatKind::None || self.scope.attr_user_type(attr).is_some()
    }

    /// Whether a parse instance holds a structure allocated by its accessor.
    fn owns_instance(&self, instance: &'m Instance) -> bool {
        instance
            .as_parse()
            .is_some_and(|parse| self.scope.user_type(&parse.ty).is_some())
    }

    /// Whether `attr` may end up unset because no switch case matched.
    fn nullable_switch(&self, attr: &Attr) -> bool {
        attr.switch_on.is_some() && attr.switch_else().is_none() && attr.repeat == RepeatKind::None
    }

    /// Whether the unprocessed bytes of `attr` are kept next to the processed ones.
    fn needs_raw(&self, attr: &Attr) -> bool {
        attr.process.is_some() && attr.repeat == RepeatKind::None
    }

    /// The constructor call reading the user type `user` from the current stream.
    fn construct(&self, user: UserType<'m>) -> String {
        let token = self.type_token(user, false);
        match user {
            UserType::Nested(_) => format!("new {token}(m__io, this, m__root)"),
            UserType::External(_) => format!("new {token}(m__io)"),
        }
    }
}

impl ExprStyle for CppScope<'_> {
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    fn name(&self, name: &str) -> String {
        if self.scope.is_member(name) || matches!(name, "_root" | "_parent") {
            format!("{name}()")
        } else {
            name.to_string()
        }
    }

    fn cast(&self, ty: &str, operand: String) -> String {
        let token = match self.module().resolve_scope_ref(ty) {
            Some(path) => self.type_token(UserType::Nested(path), false),
            None => user_type_name(ty),
        };
        format!("static_cast<{token}*>({operand})")
    }

    fn field(&self, operand: String, field: &str) -> String {
        format!("{operand}->{field}()")
    }
}

/// An item rendered with the context of another scope, after an empty line.
struct Nested<'a, 'm, T> {
    scope: &'a CppScope<'m>,
    item: T,
}

impl<'m, T: Gen<CppScope<'m>>> Gen<CppScope<'_>> for Nested<'_, 'm, T> {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        ctx.endl()?;
        self.item.gen(&mut ctx.with_lang(self.scope))
    }
}

/// The headers of the imports providing the external types used in the module.
fn imported_headers(module: &Module) -> Vec<String> {
    let mut headers = vec![];
    for (stem, _) in imported_types(module) {
        let header = format!("#include \"{stem}.h\"");
        if !headers.contains(&header) {
            headers.push(header);
        }
    }
    headers
}

struct HeaderFile;

impl Gen<CppScope<'_>> for HeaderFile {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let lang = ctx.lang;
        let module = lang.module();
        let root = lang.root_type();
        let has_repeat = module
            .scopes()
            .any(|s| s.spec.attrs.iter().any(|a| a.repeat != RepeatKind::None));
        let has_enums = module.scopes().any(|s| !s.spec.enums.is_empty());
        let mut includes = vec![];
        if has_repeat {
            includes.push(Line("#include <vector>".to_string()));
        }
        if has_enums {
            includes.push(Line("#include <set>".to_string()));
        }
        includes.extend(imported_headers(module).into_iter().map(Line));
        let enums: Vec<_> = module.root().enums.iter().map(RootEnum).collect();

        gen!(ctx, {
            "#pragma once";
            ();
            "// This is a generated file! Please edit source .ksy file and use kaitai-struct-compiler to rebuild";
            ();
            "class {};" % &root;
            ();
            "#include \"kaitai/kaitaistruct.h\"";
            "#include <kaitai/exceptions.h>";
            "#include <stdint.h>";
            "#include <memory>";
            (&includes);
            ();
            "#if KAITAI_STRUCT_VERSION < 11000L";
            "#error \"Incompatible Kaitai Struct C++/STL API: version 0.11 or later is required\"";
            "#endif";
            ();
            (&enums, &ClassDecl);
        })
    }
}

/// An enum declared at the top level, as an `enum class`.
struct RootEnum<'a>(&'a EnumDef);

impl Gen<CppScope<'_>> for RootEnum<'_> {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let def = self.0;
        let values = separated_lines(
            def.values
                .iter()
                .map(|v| format!("{} = {}", sanitize(&v.name), v.value))
                .collect(),
            ",",
        );
        gen!(ctx, {
            "enum class {} {{" % &enum_class_name(&def.name);
            ({
                (&values);
            });
            "};";
            ();
        })
    }
}

/// An enum declared inside a nested class, with its set of defined values.
struct NestedEnumDecl<'a>(&'a EnumDef);

impl Gen<CppScope<'_>> for NestedEnumDecl<'_> {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let def = self.0;
        let ty = format!("{}_t", def.short_name());
        let values = separated_lines(
            def.values
                .iter()
                .map(|v| format!("{} = {}", nested_enum_value(def, &v.name), v.value))
                .collect(),
            ",",
        );
        gen!(ctx, {
            ({
                "enum {} {{" % &ty;
                ({
                    (&values);
                });
                "};";
                "static bool _is_defined_{0}({0} v);" % &ty;
            });
            ();
            "private:";
            ({
                "static const std::set<{0}> _values_{0};" % &ty;
            });
            ();
            "public:";
            ();
        })
    }
}

/// The declaration of the class of the current scope, with its nested classes.
struct ClassDecl;

impl Gen<CppScope<'_>> for ClassDecl {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let lang = ctx.lang;
        let spec = lang.scope.spec;
        let class = lang.class_name();
        let parent = lang.parent_ptr();
        let root = lang.root_type();
        let children = lang.children();

        let forward: Vec<_> = children
            .iter()
            .map(|child| Line(format!("class {};", child.class_name())))
            .collect();
        let enums: Vec<_> = if lang.scope.is_root() {
            vec![]
        } else {
            spec.enums.iter().map(NestedEnumDecl).collect()
        };
        let nested: Vec<_> = children
            .iter()
            .map(|scope| Nested {
                scope,
                item: ClassDecl,
            })
            .collect();

        let mut accessors = vec![];
        for instance in &spec.instances {
            let ty = lang.instance_type(instance, false);
            accessors.push(Line(format!("{ty} {}();", instance.id)));
        }
        for attr in &spec.attrs {
            let get = if lang.owns_pointer(attr) { ".get()" } else { "" };
            accessors.push(Line(format!(
                "{} {id}() const {{ return m_{id}{get}; }}",
                lang.accessor_type(attr),
                id = attr.id,
            )));
        }
        accessors.push(Line(format!(
            "{root}* _root() const {{ return m__root; }}"
        )));
        accessors.push(Line(format!(
            "{parent} _parent() const {{ return m__parent; }}"
        )));
        for attr in spec.attrs.iter().filter(|a| lang.needs_raw(a)) {
            accessors.push(Line(format!(
                "std::string _raw_{id}() const {{ return m__raw_{id}; }}",
                id = attr.id
            )));
        }
        for attr in spec.attrs.iter().filter(|a| lang.nullable_switch(a)) {
            accessors.push(Line(format!(
                "bool _is_null_{id}() {{ {id}(); return n_{id}; }};",
                id = attr.id
            )));
        }

        let mut fields = vec![];
        for instance in &spec.instances {
            fields.push(Line(format!("bool f_{};", instance.id)));
            fields.push(Line(format!(
                "{} m_{};",
                lang.instance_type(instance, false),
                instance.id
            )));
        }
        for attr in &spec.attrs {
            fields.push(Line(format!("{} m_{};", lang.storage_type(attr), attr.id)));
            if lang.nullable_switch(attr) {
                fields.push(Line(format!("bool n_{};", attr.id)));
            }
        }
        fields.push(Line(format!("{root}* m__root;")));
        fields.push(Line(format!("{parent} m__parent;")));
        for attr in spec.attrs.iter().filter(|a| lang.needs_raw(a)) {
            fields.push(Line(format!("std::string m__raw_{};", attr.id)));
        }

        gen!(ctx, {
            "class {} : public kaitai::kstruct {{" % &class;
            ();
            "public:";
            ({
                (&forward, &blank_if(!forward.is_empty()));
            });
            (&enums, &blank_if(forward.is_empty() && enums.is_empty()));
            ({
                "{}(kaitai::kstream* p__io, {} p__parent = nullptr, {}* p__root = nullptr);" % (&class, &parent, &root);
            });
            ();
            "private:";
            ({
                "void _read();";
                "void _clean_up();";
            });
            ();
            "public:";
            ({
                "~{}();" % &class;
                (&nested);
            });
            || if nested.is_empty() {
                Ok(())
            } else {
                gen!(ctx, {
                    ();
                    "public:";
                })
            };
            ({
                (&accessors);
            });
            ();
            "private:";
            ({
                (&fields);
            });
            "};";
        })
    }
}

struct SourceFile;

impl Gen<CppScope<'_>> for SourceFile {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let lang = ctx.lang;
        let module = lang.module();
        let header = format!("#include \"{}.h\"", module.name());
        let exceptions = module
            .scopes()
            .any(|s| !s.spec.validations.is_empty())
            .then(|| Line("#include \"kaitai/exceptions.h\""));
        gen!(ctx, {
            "// This is a generated file! Please edit source .ksy file and use kaitai-struct-compiler to rebuild";
            ();
            (&Line(header), &exceptions);
            ();
            (&ClassDefs);
        })
    }
}

/// The out-of-class definitions of the current scope, then of its nested classes.
struct ClassDefs;

impl Gen<CppScope<'_>> for ClassDefs {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let lang = ctx.lang;
        let spec = lang.scope.spec;
        let full = lang.full_class();
        let class = lang.class_name();
        let parent = lang.parent_ptr();
        let root = lang.root_type();
        let children = lang.children();

        let enums: Vec<_> = if lang.scope.is_root() {
            vec![]
        } else {
            spec.enums.iter().map(NestedEnumDef).collect()
        };
        let root_init = if lang.scope.is_root() {
            "m__root = p__root ? p__root : this;"
        } else {
            "m__root = p__root;"
        };
        let mut init = vec![Line(root_init.to_string())];
        for instance in &spec.instances {
            init.push(Line(format!("f_{} = false;", instance.id)));
        }
        for attr in spec.attrs.iter().filter(|a| lang.owns_pointer(a)) {
            init.push(Line(format!("m_{} = nullptr;", attr.id)));
        }
        let reads: Vec<_> = spec.attrs.iter().map(AttrRead).collect();
        let checks: Vec<_> = spec.validations.iter().map(ValidationCheck).collect();
        let owned_instances: Vec<_> = spec
            .instances
            .iter()
            .filter(|&i| lang.owns_instance(i))
            .collect();
        for instance in &owned_instances {
            init.push(Line(format!("m_{} = nullptr;", instance.id)));
        }
        let cleanup: Vec<_> = owned_instances
            .iter()
            .map(|i| InstanceRelease(&i.id))
            .collect();
        let nested: Vec<_> = children
            .iter()
            .map(|scope| Nested {
                scope,
                item: ClassDefs,
            })
            .collect();
        let instances: Vec<_> = spec.instances.iter().map(InstanceDef).collect();

        gen!(ctx, {
            (&enums);
            "{}::{}(kaitai::kstream* p__io, {} p__parent, {}* p__root) : kaitai::kstruct(p__io) {{" % (&full, &class, &parent, &root);
            ({
                "m__parent = p__parent;";
                (&init);
                "_read();";
            });
            "}";
            ();
            "void {}::_read() {{" % &full;
            ({
                (&reads, &checks);
            });
            "}";
            ();
            "{}::~{}() {{" % (&full, &class);
            ({
                "_clean_up();";
            });
            "}";
            ();
            "void {}::_clean_up() {{" % &full;
            ({
                (&cleanup);
            });
            "}";
            (&nested, &instances);
        })
    }
}

struct InstanceRelease<'m>(&'m str);

impl Gen<CppScope<'_>> for InstanceRelease<'_> {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let id = Raw(self.0);
        gen!(ctx, {
            "if (f_{} && m_{}) {{" % (&id, &id);
            ({
                "delete m_{};" % &id;
                "m_{} = nullptr;" % &id;
            });
            "}";
        })
    }
}

/// The set of defined values of an enum declared inside a nested class.
struct NestedEnumDef<'a>(&'a EnumDef);

impl Gen<CppScope<'_>> for NestedEnumDef<'_> {
    fn gen(&self, ctx: GenContext<CppScope>) -> Result {
        let def = self.0;
        let full = ctx.lang.full_class();
        let ty = format!("{full}::{}_t", def.short_name());
        let values: Vec<_> = def
            .values
            .iter()
            .map(|v| Line(format!("{full}::{},", nested_enum_value(def, &v.name))))
            .collect();
        let name = Raw(format!("{}_t", def.short_name()));
        gen!(ctx, {
            "const std::set<{}> {}::_values_{}{{" % (&ty, &full, &name);
            ({
                (&values);
            });
            "};";
            "bool {}::_is_defined_{}({} v) {{" % (&full, &name, &ty);
            ({
                "return {0}::_values_{1}.find(v) != {0}::_values_{1}.end();" % (&full, &name);
            });
            "}";
            ();
        })
    }
}

/// The read of a sequence attr, guarded by its condition.
struct AttrRead<'m>(&'m Attr);

impl<'m> Gen<CppScope<'m>> for AttrRead<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let attr = self.0;
        let null = ctx
            .lang
            .nullable_switch(attr)
            .then(|| Line(format!("n_{} = true;", attr.id)));
        match &attr.if_expr {
            Some(cond) => gen!(ctx, {
                (&null);
                "if ({}) {{" % cond;
                ({
                    (&AttrBody(attr));
                });
                "}";
            }),
            None => gen!(ctx, {
                (&null, &AttrBody(attr));
            }),
        }
    }
}

struct AttrBody<'m>(&'m Attr);

impl<'m> Gen<CppScope<'m>> for AttrBody<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        let id = Raw(&attr.id);
        let value = AttrValue(attr);
        let count = attr.repeat_expr.as_ref();
        match attr.repeat {
            RepeatKind::None => {
                if let (Some(on), true) = (&attr.switch_on, has_literal_cases(&attr.switch_cases)) {
                    return NativeSwitch { attr, on }.gen(ctx);
                }
                if let Some(Process::XorConst(key)) = attr.process.filter(|_| lang.needs_raw(attr)) {
                    let raw = BytesRead(attr.size.as_ref());
                    return gen!(ctx, {
                        "m__raw_{} = {};" % (&id, &raw);
                        "m_{0} = kaitai::kstream::process_xor_one(m__raw_{0}, {1});" % (&id, &Raw(key));
                    });
                }
                let set = lang
                    .nullable_switch(attr)
                    .then(|| Line(format!("n_{} = false;", attr.id)));
                gen!(ctx, {
                    "m_{} = {};" % (&id, &value);
                    (&set);
                })
            }
            repeat => {
                let elem = Raw(lang.element_type(attr));
                gen!(ctx, "m_{0} = std::unique_ptr<std::vector<{1}>>(new std::vector<{1}>());" % (&id, &elem); ())?;
                match (repeat, count) {
                    (RepeatKind::Expr, Some(count)) => gen!(ctx, {
                        "const int l_{} = {};" % (&id, count);
                        "for (int i = 0; i < l_{}; i++) {{" % &id;
                        ({
                            "m_{}->push_back(std::move({}));" % (&id, &value);
                        });
                        "}";
                    }),
                    (RepeatKind::Until, Some(until)) => {
                        let until = WithItem {
                            expr: until,
                            item: "repeat_item",
                        };
                        gen!(ctx, {
                            "while (true) {";
                            ({
                                "auto repeat_item = {};" % &value;
                                "bool done = {};" % &until;
                                "m_{}->push_back(std::move(repeat_item));" % &id;
                                "if (done) break;";
                            });
                            "}";
                        })
                    }
                    _ => gen!(ctx, {
                        "while (!m__io->is_eof()) {";
                        ({
                            "m_{}->push_back({});" % (&id, &value);
                        });
                        "}";
                    }),
                }
            }
        }
    }
}

/// A switch over integer literals, as a C++ `switch` statement.
struct NativeSwitch<'m> {
    attr: &'m Attr,
    on: &'m Expr,
}

impl<'m> Gen<CppScope<'m>> for NativeSwitch<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let attr = self.attr;
        let arms: Vec<_> = attr
            .switch_cases
            .iter()
            .map(|case| NativeArm { attr, case })
            .collect();
        gen!(ctx, {
            "switch ({}) {{" % self.on;
            (&arms);
            "}";
        })
    }
}

struct NativeArm<'m> {
    attr: &'m Attr,
    case: &'m SwitchCase,
}

impl<'m> Gen<CppScope<'m>> for NativeArm<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.attr;
        let read = PrimitiveRead::attr(lang, attr, lang.scope.case_primitive(&self.case.ty));
        let set = lang
            .nullable_switch(attr)
            .then(|| Line(format!("n_{} = false;", attr.id)));
        match &self.case.matches {
            Some(matches) => gen!(ctx, "case {}: {{" % matches; ())?,
            None => gen!(ctx, "default: {"; ())?,
        }
        gen!(ctx, {
            ({
                (&set);
                "m_{} = {};" % (&Raw(&attr.id), &read);
                "break;";
            });
            "}";
        })
    }
}

/// A switch evaluated inline by a lambda, for any kind of case value.
struct SwitchLambda<'m>(&'m Attr);

impl<'m> Gen<CppScope<'m>> for SwitchLambda<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        let Some(on) = &attr.switch_on else {
            return Ok(());
        };
        let ty = Raw(lang.base_type(attr, false));
        let mut arms = vec![];
        let mut fallback = None;
        for case in &attr.switch_cases {
            let read = PrimitiveRead::attr(lang, attr, lang.scope.case_primitive(&case.ty));
            match &case.matches {
                Some(matches) => arms.push(LambdaArm {
                    test: Expr::binary("==", on.clone(), matches.clone()),
                    read,
                }),
                None => fallback = Some(read),
            }
        }
        gen!(ctx, {
            "([&]() -> {} {{" % &ty;
            ({
                (&arms);
                || match &fallback {
                    Some(read) => gen!(ctx, "return {};" % read; ()),
                    None => gen!(ctx, "throw std::runtime_error(\"switch-on has no matching case\");"; ()),
                };
            });
            "})()"
        })
    }
}

struct LambdaArm<'m> {
    test: Expr,
    read: PrimitiveRead<'m>,
}

impl<'m> Gen<CppScope<'m>> for LambdaArm<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        gen!(ctx, "if ({}) return {};" % (&self.test, &self.read); ())
    }
}

/// One value of an attr, as an expression.
struct AttrValue<'m>(&'m Attr);

impl<'m> Gen<CppScope<'m>> for AttrValue<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let attr = self.0;
        if attr.switch_on.is_some() {
            return SwitchLambda(attr).gen(ctx);
        }
        if let Some(user) = lang.scope.attr_user_type(attr) {
            let ty = Raw(lang.type_token(user, false));
            let construct = Raw(lang.construct(user));
            return gen!(ctx, "std::unique_ptr<{}>({})" % (&ty, &construct));
        }
        let primitive = lang.scope.attr_primitive(attr).unwrap_or(PrimitiveType::U1);
        let read = PrimitiveRead::attr(lang, attr, primitive);
        match &attr.enum_name {
            Some(reference) => {
                let ty = Raw(lang.enum_type(reference, false));
                gen!(ctx, "static_cast<{}>({})" % (&ty, &read))
            }
            None => gen!(ctx, "{}" % &read),
        }
    }
}

/// `read_bytes` with an explicit size, or up to the end of the stream.
struct BytesRead<'m>(Option<&'m Expr>);

impl<'m> Gen<CppScope<'m>> for BytesRead<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        match self.0 {
            Some(size) => gen!(ctx, "m__io->read_bytes({})" % size),
            None => gen!(ctx, "m__io->read_bytes_full()"),
        }
    }
}

/// The read of a single primitive value from the current stream.
struct PrimitiveRead<'m> {
    primitive: PrimitiveType,
    method: &'static str,
    size: Option<&'m Expr>,
    encoding: Option<&'m str>,
    process: Option<Process>,
}

impl<'m> PrimitiveRead<'m> {
    fn attr(lang: &CppScope<'m>, attr: &'m Attr, primitive: PrimitiveType) -> Self {
        let endian = attr.endian.unwrap_or(lang.scope.spec.default_endian);
        Self {
            primitive,
            method: read_method(primitive, endian),
            size: attr.size.as_ref(),
            encoding: attr.encoding.as_deref(),
            process: attr.process,
        }
    }

    fn instance(lang: &CppScope<'m>, parse: &'m ParseInstance, primitive: PrimitiveType) -> Self {
        let endian = parse.endian.unwrap_or(lang.scope.spec.default_endian);
        Self {
            primitive,
            method: read_method(primitive, endian),
            size: parse.size.as_ref(),
            encoding: parse.encoding.as_deref(),
            process: None,
        }
    }
}

impl<'m> Gen<CppScope<'m>> for PrimitiveRead<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        match self.primitive {
            PrimitiveType::Bytes => match self.process {
                Some(Process::XorConst(key)) => gen!(
                    ctx,
                    "kaitai::kstream::process_xor_one({}, {})" % (&BytesRead(self.size), &Raw(key))
                ),
                None => gen!(ctx, "{}" % &BytesRead(self.size)),
            },
            PrimitiveType::Str => match self.size {
                Some(size) => {
                    let encoding = Raw(self.encoding.unwrap_or(DEFAULT_ENCODING));
                    gen!(ctx, "kaitai::kstream::bytes_to_str(m__io->read_bytes({}), \"{}\")" % (size, &encoding))
                }
                None => gen!(ctx, "std::string()"),
            },
            _ => gen!(ctx, "m__io->{}()" % &Raw(self.method)),
        }
    }
}

/// A post-read check, raising the runtime's validation errors.
struct ValidationCheck<'m>(&'m Validation);

impl<'m> Gen<CppScope<'m>> for ValidationCheck<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let validation = self.0;
        let target = Raw(&validation.target);
        let spec = lang.scope.spec;
        if let Some(expected) = expected_literal(&lang.scope, validation) {
            let ty = Raw(spec
                .attr(&validation.target)
                .map(|attr| lang.storage_type(attr))
                .unwrap_or_else(|| "int32_t".into()));
            let index = Raw(lang.scope.attr_index(&validation.target).unwrap_or(0));
            let expected = Raw(expected);
            return gen!(ctx, {
                "if (!(m_{} == {})) {{" % (&target, &expected);
                ({
                    "throw kaitai::validation_not_equal_error<{}>({}, m_{}, m__io, std::string(\"/seq/{}\"));" % (&ty, &expected, &target, &index);
                });
                "}";
            });
        }
        let ty = Raw(match (spec.attr(&validation.target), spec.instance(&validation.target)) {
            (Some(attr), _) => lang.accessor_type(attr),
            (None, Some(instance)) => lang.instance_type(instance, false),
            (None, None) => "int32_t".into(),
        });
        gen!(ctx, {
            "if (!({})) {{" % &validation.condition;
            ({
                "throw kaitai::validation_expr_error<{}>({}(), m__io, \"/valid/{}\");" % (&ty, &target, &target);
            });
            "}";
        })
    }
}

/// The lazy accessor of an instance.
struct InstanceDef<'m>(&'m Instance);

impl<'m> Gen<CppScope<'m>> for InstanceDef<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let instance = self.0;
        let id = Raw(&instance.id);
        let ty = Raw(lang.instance_type(instance, true));
        let full = Raw(lang.full_class());
        gen!(ctx, {
            ();
            "{} {}::{}() {{" % (&ty, &full, &id);
            ({
                "if (f_{})" % &id;
                ({
                    "return m_{};" % &id;
                });
                "f_{} = true;" % &id;
                (&InstanceBody(instance));
                "return m_{};" % &id;
            });
            "}";
        })
    }
}

struct InstanceBody<'m>(&'m Instance);

impl<'m> Gen<CppScope<'m>> for InstanceBody<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        let lang = ctx.lang;
        let id = Raw(&self.0.id);
        match &self.0.kind {
            InstanceKind::Value(expr) => gen!(ctx, "m_{} = {};" % (&id, expr); ()),
            InstanceKind::Parse(parse) => {
                let read = match lang.scope.user_type(&parse.ty) {
                    Some(user) => lang.construct(user),
                    None => gen_string(
                        &PrimitiveRead::instance(
                            lang,
                            parse,
                            lang.scope.case_primitive(&parse.ty),
                        ),
                        lang,
                        ctx.unit,
                    )?,
                };
                let seek = parse.pos.as_ref().map(SeekTo);
                gen!(ctx, {
                    "std::streampos _pos = m__io->pos();";
                    (&seek);
                    "m_{} = {};" % (&id, &Raw(read));
                    "m__io->seek(_pos);";
                })
            }
        }
    }
}

struct SeekTo<'m>(&'m Expr);

impl<'m> Gen<CppScope<'m>> for SeekTo<'m> {
    fn gen(&self, ctx: GenContext<CppScope<'m>>) -> Result {
        gen!(ctx, "m__io->seek({});" % self.0; ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksc_ir::{Endian, Spec, TypeDef, TypeRef};
    use pretty_assertions::assert_eq;
    use speculoos::prelude::*;

    fn header(spec: &Spec) -> String {
        let module = Module::new(spec).unwrap();
        let lang = CppScope::new(module.root_scope());
        gen_string(&HeaderFile, &lang, "    ").unwrap()
    }

    fn source(spec: &Spec) -> String {
        let module = Module::new(spec).unwrap();
        let lang = CppScope::new(module.root_scope());
        gen_string(&SourceFile, &lang, "    ").unwrap()
    }

    #[test]
    fn test_type_names() {
        assert_eq!(user_type_name("a::b"), "a_t::b_t");
        assert_eq!(user_type_name("struct"), "kaitai::kstruct");
        assert_eq!(qualified_class("top", ""), "top_t");
        assert_eq!(qualified_class("top", "a::b"), "top_t::a_t::b_t");
        assert_eq!(enum_class_name("top::file-kind"), "file_kind_e");
    }

    #[test]
    fn test_value_types() {
        let mut known = HashMap::new();
        assert_eq!(value_type(&Expr::Int(3), &known), "int8_t");
        assert_eq!(value_type(&Expr::Int(300), &known), "int32_t");
        let cmp = Expr::binary("<", Expr::name("a"), Expr::Int(1));
        assert_eq!(value_type(&cmp, &known), "bool");
        known.insert("flag", "bool");
        assert_eq!(value_type(&Expr::name("flag"), &known), "bool");
        assert_eq!(value_type(&Expr::name("other"), &known), "int32_t");
    }

    #[test]
    fn test_header_members() {
        let mut spec = Spec::new("hdr", Endian::Le);
        spec.attrs.push(Attr::new("magic", PrimitiveType::U4));
        spec.attrs.push(
            Attr::new("items", PrimitiveType::U2)
                .with_repeat(RepeatKind::Expr, Some(Expr::name("magic"))),
        );
        spec.instances.push(Instance::value(
            "big",
            Expr::binary(">", Expr::name("magic"), Expr::Int(10)),
        ));
        let out = header(&spec);
        assert_that!(out).contains("class hdr_t : public kaitai::kstruct {");
        assert_that!(out).contains("#include <vector>\n");
        assert_that!(out).contains("    bool big();\n");
        assert_that!(out).contains("    uint32_t magic() const { return m_magic; }\n");
        assert_that!(out)
            .contains("    std::vector<uint16_t>* items() const { return m_items.get(); }\n");
        assert_that!(out).contains("    std::unique_ptr<std::vector<uint16_t>> m_items;\n");
        assert_that!(out).contains("    kaitai::kstruct* m__parent;\n");
    }

    #[test]
    fn test_repeat_until_binds_item() {
        let mut spec = Spec::new("r", Endian::Be);
        spec.attrs.push(Attr::new("words", PrimitiveType::U2).with_repeat(
            RepeatKind::Until,
            Some(Expr::binary("==", Expr::name("_"), Expr::Int(0))),
        ));
        let out = source(&spec);
        assert_that!(out).contains(
            "    while (true) {\n        auto repeat_item = m__io->read_u2be();\n        bool done = repeat_item == 0;\n        m_words->push_back(std::move(repeat_item));\n        if (done) break;\n    }\n",
        );
        assert_that!(out).does_not_contain("} while (");
    }

    #[test]
    fn test_repeat_until_user_type_checks_before_move() {
        let mut inner = Spec::new("chunk", Endian::Le);
        inner.attrs.push(Attr::new("last", PrimitiveType::U1));
        let mut spec = Spec::new("top", Endian::Le);
        spec.types.push(TypeDef::new("chunk", TypeRef::embedded(&inner)));
        spec.attrs.push(Attr::new("chunks", TypeRef::user("chunk")).with_repeat(
            RepeatKind::Until,
            Some(Expr::binary("!=", Expr::field(Expr::name("_"), "last"), Expr::Int(0))),
        ));
        let out = source(&spec);
        let check = out.find("        bool done = ").unwrap();
        let push = out.find("        m_chunks->push_back(std::move(repeat_item));\n").unwrap();
        assert!(check < push);
    }

    #[test]
    fn test_nested_scope_classes() {
        let mut inner = Spec::new("chunk", Endian::Le);
        inner.attrs.push(Attr::new("len", PrimitiveType::U2));
        let mut spec = Spec::new("top", Endian::Le);
        spec.types.push(TypeDef::new("chunk", TypeRef::embedded(&inner)));
        spec.attrs.push(Attr::new("first", TypeRef::user("chunk")));
        let out = header(&spec);
        assert_that!(out).contains("    class chunk_t;\n");
        assert_that!(out).contains("    class chunk_t : public kaitai::kstruct {\n");
        assert_that!(out).contains(
            "        chunk_t(kaitai::kstream* p__io, top_t* p__parent = nullptr, top_t* p__root = nullptr);\n",
        );
        assert_that!(out).contains("    chunk_t* first() const { return m_first.get(); }\n");
        let out = source(&spec);
        assert_that!(out).contains(
            "top_t::chunk_t::chunk_t(kaitai::kstream* p__io, top_t* p__parent, top_t* p__root) : kaitai::kstruct(p__io) {\n",
        );
        assert_that!(out).contains(
            "    m_first = std::unique_ptr<chunk_t>(new chunk_t(m__io, this, m__root));\n",
        );
    }

    #[test]
    fn test_clean_up_releases_parsed_structures() {
        let mut inner = Spec::new("chunk", Endian::Le);
        inner.attrs.push(Attr::new("len", PrimitiveType::U2));
        let mut spec = Spec::new("top", Endian::Le);
        spec.types.push(TypeDef::new("chunk", TypeRef::embedded(&inner)));
        spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
        spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
            Expr::name("tag"),
            vec![SwitchCase::on(Expr::Int(1), PrimitiveType::U2)],
        ));
        spec.instances
            .push(Instance::parse("trailer", TypeRef::user("chunk"), Some(Expr::Int(8))));
        spec.instances
            .push(Instance::parse("crc", PrimitiveType::U4, Some(Expr::Int(4))));
        let out = source(&spec);
        assert_that!(out).contains("    m_trailer = nullptr;\n");
        assert_that!(out).contains(
            "void top_t::_clean_up() {\n    if (f_trailer && m_trailer) {\n        delete m_trailer;\n        m_trailer = nullptr;\n    }\n}\n",
        );
        assert_that!(out).does_not_contain("if (f_crc &&");
        assert_that!(out).does_not_contain("if (!n_body) {");
    }

    #[test]
    fn test_native_switch_without_else_is_nullable() {
        let mut spec = Spec::new("sw", Endian::Le);
        spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
        spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
            Expr::name("tag"),
            vec![
                SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
                SwitchCase::on(Expr::Int(2), PrimitiveType::U4),
            ],
        ));
        let out = header(&spec);
        assert_that!(out).contains("    uint32_t body() const { return m_body; }\n");
        assert_that!(out).contains("    bool _is_null_body() { body(); return n_body; };\n");
        let out = source(&spec);
        assert_that!(out).contains("    n_body = true;\n    switch (tag()) {\n    case 1: {\n");
        assert_that!(out).contains("        m_body = m__io->read_u4le();\n        break;\n");
        assert_that!(out).does_not_contain("default:");
    }
}
