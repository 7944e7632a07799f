use std::path::PathBuf;

use ksc_gen::{emit, render, Artifact, EmitOptions, Error};
use ksc_ir::*;
use pretty_assertions::assert_eq;
use speculoos::prelude::*;

fn artifacts(spec: &Spec, target: &str) -> Vec<Artifact> {
    let _ = env_logger::builder().is_test(true).try_init();
    render(spec, target, &EmitOptions::default()).unwrap()
}

fn content<'a>(artifacts: &'a [Artifact], path: &str) -> &'a str {
    artifacts
        .iter()
        .find(|a| a.path == PathBuf::from(path))
        .map(|a| a.content.as_str())
        .unwrap_or_else(|| panic!("no artifact {path}"))
}

/// A spec exercising most constructs, with a nested scope.
fn packet() -> Spec {
    let mut chunk = Spec::new("chunk", Endian::Be);
    chunk.attrs.push(Attr::new("len", PrimitiveType::U2));
    chunk
        .attrs
        .push(Attr::new("data", PrimitiveType::Bytes).with_size(Expr::name("len")));

    let mut spec = Spec::new("packet", Endian::Le);
    spec.enums
        .push(EnumDef::new("kind", [(0, "empty"), (1, "data")]));
    spec.types
        .push(TypeDef::new("chunk", TypeRef::embedded(&chunk)));
    spec.attrs
        .push(Attr::new("kind", PrimitiveType::U1).with_enum("kind"));
    spec.attrs.push(Attr::new("a", PrimitiveType::U1));
    spec.attrs.push(Attr::new("b", PrimitiveType::U1));
    spec.attrs.push(Attr::new("lit", PrimitiveType::U1));
    spec.attrs.push(
        Attr::new("chunks", TypeRef::user("chunk")).with_repeat(RepeatKind::Eos, None),
    );
    spec.instances.push(Instance::value(
        "arith",
        Expr::binary(
            "-",
            Expr::binary(
                "+",
                Expr::name("a"),
                Expr::binary("*", Expr::name("b"), Expr::Int(3)),
            ),
            Expr::Int(2),
        ),
    ));
    spec.instances.push(Instance::value(
        "logic",
        Expr::binary(
            "and",
            Expr::binary(">", Expr::name("a"), Expr::name("b")),
            Expr::binary("==", Expr::name("lit"), Expr::Int(7)),
        ),
    ));
    spec.validations.push(Validation::new(
        "lit",
        Expr::binary("==", Expr::name("lit"), Expr::Int(5)),
        "",
    ));
    spec.validations.push(Validation::new(
        "a",
        Expr::binary(">", Expr::name("a"), Expr::Int(0)),
        "",
    ));
    spec
}

#[test]
fn test_cpp_expressions_and_types() {
    let out = artifacts(&packet(), "cpp_stl");
    assert_eq!(
        out.iter().map(|a| a.path.clone()).collect::<Vec<_>>(),
        vec![PathBuf::from("packet.h"), PathBuf::from("packet.cpp")]
    );
    let header = content(&out, "packet.h");
    assert_that!(header).contains("enum class kind_e {\n");
    assert_that!(header).contains("    int32_t arith();\n");
    assert_that!(header).contains("    bool logic();\n");
    assert_that!(header).contains("    class chunk_t : public kaitai::kstruct {\n");

    let source = content(&out, "packet.cpp");
    assert_that!(source).contains("m_arith = (a() + b() * 3) - 2;\n");
    assert_that!(source).contains("m_logic = ((a() > b()) && (lit() == 7));\n");
}

#[test]
fn test_validation_specialization() {
    let out = artifacts(&packet(), "cpp_stl");
    let source = content(&out, "packet.cpp");
    assert_that!(source).contains("if (!(m_lit == 5)) {\n");
    assert_that!(source).contains(
        "throw kaitai::validation_not_equal_error<uint8_t>(5, m_lit, m__io, std::string(\"/seq/3\"));\n",
    );
    assert_that!(source).contains("if (!(a() > 0)) {\n");
    assert_that!(source)
        .contains("throw kaitai::validation_expr_error<uint8_t>(a(), m__io, \"/valid/a\");\n");

    let out = artifacts(&packet(), "python");
    let module = content(&out, "packet.py");
    assert_that!(module)
        .contains("raise ValidationNotEqualError(5, self.lit, self._io, u\"/seq/3\")\n");
    assert_that!(module).contains("raise ValidationExprError(self.a, self._io, u\"/valid/a\")\n");
}

#[test]
fn test_switch_width() {
    let mut spec = Spec::new("sw", Endian::Le);
    spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
    spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
        Expr::name("tag"),
        vec![
            SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
            SwitchCase::on(Expr::Int(2), PrimitiveType::U4),
            SwitchCase::otherwise(PrimitiveType::U1),
        ],
    ));
    let out = artifacts(&spec, "cpp_stl");
    assert_that!(content(&out, "sw.h")).contains("    uint32_t m_body;\n");
}

#[test]
fn test_nested_enum_lexical_scoping() {
    let mut outer = Spec::new("outer", Endian::Le);
    outer.enums.push(EnumDef::new("mode", [(1, "fast")]));
    let mut sibling = Spec::new("sibling", Endian::Le);
    sibling.enums.push(EnumDef::new("mode", [(9, "slow")]));
    let mut inner = Spec::new("inner", Endian::Le);
    inner
        .attrs
        .push(Attr::new("m", PrimitiveType::U1).with_enum("mode"));

    let mut spec = Spec::new("root", Endian::Le);
    spec.types
        .push(TypeDef::new("outer", TypeRef::embedded(&outer)));
    spec.types
        .push(TypeDef::new("sibling", TypeRef::embedded(&sibling)));
    spec.types
        .push(TypeDef::new("outer::inner", TypeRef::embedded(&inner)));

    let out = artifacts(&spec, "cpp_stl");
    let header = content(&out, "root.h");
    assert_that!(header).contains("root_t::outer_t::mode_t m() const { return m_m; }\n");
    assert_that!(header).does_not_contain("sibling_t::mode_t m()");
    assert_that!(header).contains("MODE_FAST = 1");

    let out = artifacts(&spec, "python");
    assert_that!(content(&out, "root.py"))
        .contains("self.m = KaitaiStream.resolve_enum(Root.Outer.Mode, self._io.read_u1())\n");
}

#[test]
fn test_scripting_backends() {
    let spec = packet();

    let out = artifacts(&spec, "python");
    let module = content(&out, "packet.py");
    assert_that!(module).contains("class Packet(KaitaiStruct):\n");
    assert_that!(module).contains("self._m_arith = (self.a + self.b * 3) - 2\n");
    assert_that!(module).contains("self._m_logic = ((self.a > self.b) and (self.lit == 7))\n");

    let out = artifacts(&spec, "ruby");
    let module = content(&out, "packet.rb");
    assert_that!(module).contains("class Packet < Kaitai::Struct::Struct\n");
    assert_that!(module).contains("@arith = (a + b * 3) - 2\n");
    assert_that!(module).contains("class Chunk < Kaitai::Struct::Struct\n");

    let out = artifacts(&spec, "lua");
    let module = content(&out, "packet.lua");
    assert_that!(module).contains("Packet = class.class(KaitaiStruct)\n");
    assert_that!(module).contains("Packet.Chunk = class.class(KaitaiStruct)\n");
    assert_that!(module).contains("local enum = require(\"enum\")\n");
    assert_that!(module).contains("self.kind = Packet.Kind(self._io:read_u1())\n");
    assert_that!(module).contains("self.chunks[#self.chunks + 1] = Packet.Chunk(self._io, self, self._root)\n");
    assert_that!(module).contains("self._m_logic = ((self.a > self.b) and (self.lit == 7))\n");
}

/// Repeated attrs whose elements dispatch on a switch, one per repeat kind.
fn frames() -> Spec {
    let cases = || {
        vec![
            SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
            SwitchCase::on(Expr::Int(2), PrimitiveType::U2),
        ]
    };
    let mut spec = Spec::new("frames", Endian::Le);
    spec.attrs.push(Attr::new("tag", PrimitiveType::U1));
    spec.attrs.push(
        Attr::new("items", PrimitiveType::U1)
            .with_switch(Expr::name("tag"), cases())
            .with_repeat(
                RepeatKind::Until,
                Some(Expr::binary("==", Expr::name("_"), Expr::Int(0))),
            ),
    );
    spec.attrs.push(
        Attr::new("counts", PrimitiveType::U1)
            .with_switch(
                Expr::name("tag"),
                vec![
                    SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
                    SwitchCase::otherwise(PrimitiveType::U2),
                ],
            )
            .with_repeat(RepeatKind::Expr, Some(Expr::Int(2))),
    );
    spec.attrs.push(
        Attr::new("rest", PrimitiveType::U1)
            .with_switch(Expr::name("tag"), cases())
            .with_repeat(RepeatKind::Eos, None),
    );
    spec
}

fn in_order(text: &str, parts: &[&str]) {
    let mut from = 0;
    for part in parts {
        let at = text[from..]
            .find(part)
            .unwrap_or_else(|| panic!("{part:?} missing after byte {from} in:\n{text}"));
        from += at + part.len();
    }
}

#[test]
fn test_repeated_switch_all_targets() {
    let spec = frames();

    let out = artifacts(&spec, "cpp_stl");
    let source = content(&out, "frames.cpp");
    in_order(
        source,
        &[
            "while (true) {",
            "auto repeat_item = ([&]() -> uint16_t {",
            "if (tag() == 1) return m__io->read_u1();",
            "if (tag() == 2) return m__io->read_u2le();",
            "throw std::runtime_error(\"switch-on has no matching case\");",
            "bool done = repeat_item == 0;",
            "m_items->push_back(std::move(repeat_item));",
            "if (done) break;",
            "const int l_counts = 2;",
            "m_counts->push_back(std::move(([&]() -> uint16_t {",
            "return m__io->read_u2le();",
            "while (!m__io->is_eof()) {",
            "m_rest->push_back(([&]() -> uint16_t {",
        ],
    );
    assert_that!(source).does_not_contain("} while (");

    let out = artifacts(&spec, "python");
    in_order(
        content(&out, "frames.py"),
        &[
            "while True:",
            "_on = self.tag",
            "_ = self._io.read_u1()",
            "_ = self._io.read_u2le()",
            "_ = None",
            "self.items.append(_)",
            "if _ == 0:",
            "for i in range(2):",
            "self.counts.append(self._io.read_u2le())",
            "while not self._io.is_eof():",
            "self.rest.append(self._io.read_u2le())",
        ],
    );

    let out = artifacts(&spec, "ruby");
    in_order(
        content(&out, "frames.rb"),
        &[
            "loop do",
            "case tag",
            "_ = @_io.read_u1",
            "_ = @_io.read_u2le",
            "@items << _",
            "break if _ == 0",
            "(2).times { |i|",
            "@counts << @_io.read_u2le",
            "while not @_io.eof?",
            "@rest << @_io.read_u2le",
        ],
    );

    for (target, file) in [("lua", "frames.lua"), ("wireshark_lua", "frames_wireshark.lua")] {
        let out = artifacts(&spec, target);
        let module = content(&out, file);
        in_order(
            module,
            &[
                "while true do",
                "local repeat_item\n",
                "local _on = self.tag",
                "repeat_item = self._io:read_u1()",
                "repeat_item = self._io:read_u2le()",
                "end\n",
                "self.items[#self.items + 1] = repeat_item",
                "if repeat_item == 0 then",
                "for i = 1, 2 do",
                "self.counts[i] = self._io:read_u2le()",
                "while not self._io:is_eof() do",
                "self.rest[#self.rest + 1] = self._io:read_u2le()",
            ],
        );
        assert_that!(module).does_not_contain("local repeat_item = ");
    }
}

#[test]
fn test_wireshark_output() {
    let out = artifacts(&packet(), "wireshark_lua");
    assert_eq!(out.len(), 1);
    let module = content(&out, "packet_wireshark.lua");
    assert_that!(module).contains("Packet = class.class(KaitaiStruct)\n");
    assert_that!(module).contains("local packet_proto = Proto(\"packet\", \"Packet\")\n");
    assert_that!(module).contains("pinfo.cols.protocol = \"Packet\"\n");
}

#[test]
fn test_python_package_path() {
    let tmpdir = tempfile::TempDir::new().unwrap();
    let options = EmitOptions {
        out_dir: tmpdir.path().to_path_buf(),
        python_package: Some("formats.net".into()),
    };
    let written = emit(&packet(), "python", &options).unwrap();
    assert_eq!(written, vec![tmpdir.path().join("formats/net/packet.py")]);
    assert!(written[0].is_file());
}

#[test]
fn test_emit_is_idempotent() {
    let tmpdir = tempfile::TempDir::new().unwrap();
    let options = EmitOptions {
        out_dir: tmpdir.path().to_path_buf(),
        python_package: None,
    };
    for target in ["cpp_stl", "python", "ruby", "lua", "wireshark_lua"] {
        let first = emit(&packet(), target, &options).unwrap();
        let before: Vec<_> = first
            .iter()
            .map(|p| std::fs::read(p).unwrap())
            .collect();
        let second = emit(&packet(), target, &options).unwrap();
        assert_eq!(first, second);
        let after: Vec<_> = second
            .iter()
            .map(|p| std::fs::read(p).unwrap())
            .collect();
        assert!(before == after, "{target} output changed between runs");
    }
}

#[test]
fn test_unsupported_operator_writes_nothing() {
    let mut spec = Spec::new("pow", Endian::Le);
    spec.attrs.push(Attr::new("a", PrimitiveType::U1));
    spec.instances.push(Instance::value(
        "sq",
        Expr::binary("**", Expr::name("a"), Expr::Int(2)),
    ));
    let tmpdir = tempfile::TempDir::new().unwrap();
    let options = EmitOptions {
        out_dir: tmpdir.path().join("out"),
        python_package: None,
    };
    let err = emit(&spec, "cpp_stl", &options).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{err:?}");
    assert_that!(err.to_string()).starts_with("not yet supported:");
    assert_that!(err.to_string()).contains("**");
    assert!(!tmpdir.path().join("out").exists());
}
