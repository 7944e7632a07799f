use ksc_ir::*;
use pretty_assertions::assert_eq;
use speculoos::prelude::*;

fn packet_header() -> Spec {
    let mut spec = Spec::new("packet_header", Endian::Be);
    spec.types.push(TypeDef::new("counter_t", PrimitiveType::U4));
    spec.attrs.push(Attr::new("len", TypeRef::user("counter_t")));
    spec.attrs.push(
        Attr::new("payload", PrimitiveType::Bytes).with_size(Expr::binary(
            "+",
            Expr::name("len"),
            Expr::Int(4),
        )),
    );
    spec.instances.push(Instance::value(
        "checksum_ok",
        Expr::unary("!", Expr::name("bad_checksum")),
    ));
    spec.validations.push(Validation::new(
        "len",
        Expr::binary(">=", Expr::name("len"), Expr::Int(0)),
        "len must be non-negative",
    ));
    spec
}

#[test]
fn test_packet_header_roundtrip() {
    let spec = packet_header();
    assert_that!(validate(&spec)).is_ok();

    let encoded = serialize(&spec);
    let decoded = deserialize(&encoded).unwrap();
    assert_eq!(decoded, spec);
    assert_eq!(serialize(&decoded), encoded);
}

#[test]
fn test_serialized_form() {
    let encoded = serialize(&packet_header());
    let expected = r#"KSIR1
name "packet_header"
default_endian be
imports 0
types 1
type "counter_t" primitive "u4"
attrs 2
attr "len" user "counter_t" none "none" "none" "none" "none" none "none" "none" 0 none
attr "payload" primitive "bytes" none "(bin \"+\" (name \"len\") (int 4))" "none" "none" "none" none "none" "none" 0 none
enums 0
instances 1
instance "checksum_ok" value "(un \"!\" (name \"bad_checksum\"))"
validations 1
validation "len" "(bin \">=\" (name \"len\") (int 0))" "len must be non-negative"
end
"#;
    assert_eq!(encoded, expected);
}

#[test]
fn test_full_featured_roundtrip() {
    let mut spec = Spec::new("everything", Endian::Le);
    spec.imports.push("common.ksir".into());
    let mut inner = Spec::new("chunk", Endian::Be);
    inner.attrs.push(Attr::new("tag", PrimitiveType::U1));
    spec.types.push(TypeDef::new("everything::chunk", TypeRef::embedded(&inner)));
    spec.enums.push(EnumDef::new("kind", [(0, "none"), (-1, "minus one")]));
    spec.attrs.push(Attr::new("k", PrimitiveType::S1).with_enum("kind"));
    spec.attrs.push(
        Attr::new("name", PrimitiveType::Str)
            .with_size(Expr::Int(8))
            .with_encoding("UTF-8")
            .with_if(Expr::binary("and", Expr::Bool(true), Expr::name("k"))),
    );
    spec.attrs.push(
        Attr::new("items", PrimitiveType::U2)
            .with_endian(Endian::Be)
            .with_repeat(RepeatKind::Until, Some(Expr::binary("==", Expr::name("_"), Expr::Int(0)))),
    );
    spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
        Expr::name("k"),
        vec![
            SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
            SwitchCase::on(Expr::unary("-", Expr::Int(1)), PrimitiveType::U4),
            SwitchCase::otherwise(PrimitiveType::U8),
        ],
    ));
    spec.attrs.push(
        Attr::new("secret", PrimitiveType::Bytes)
            .with_size(Expr::Int(3))
            .with_process(Process::XorConst(0x5a)),
    );
    spec.attrs.push(Attr::new("chunk", TypeRef::user("everything::chunk")));
    spec.attrs.push(Attr::new("shared", TypeRef::user("common")));
    let mut parsed = Instance::parse("trailer", PrimitiveType::Str, Some(Expr::Int(16)));
    if let InstanceKind::Parse(p) = &mut parsed.kind {
        p.size = Some(Expr::Int(4));
        p.encoding = Some("ASCII".into());
        p.endian = Some(Endian::Be);
    }
    spec.instances.push(parsed);
    spec.instances.push(Instance::value(
        "tag_of_chunk",
        Expr::field(Expr::cast("everything::chunk", Expr::name("chunk")), "tag"),
    ));
    spec.validations.push(Validation::new(
        "k",
        Expr::binary("!=", Expr::name("k"), Expr::Int(7)),
        "quote \" and backslash \\ survive",
    ));
    assert_that!(validate(&spec)).is_ok();

    let encoded = serialize(&spec);
    let decoded = deserialize(&encoded).unwrap();
    assert_eq!(decoded, spec);
    assert_eq!(serialize(&decoded), encoded);
}

#[test]
fn test_invalid_spec_rejected_on_deserialize() {
    let mut spec = packet_header();
    spec.name = String::new();
    let err = deserialize(&serialize(&spec)).unwrap_err();
    assert_eq!(err.to_string(), "spec.name is required");
    // Without validation the very same text is accepted.
    assert!(deserialize_unchecked(&serialize(&spec)).is_ok());
}
