use std::any::Any;
use std::io::{Cursor, Seek, Write};

use ocodec_core::binfmt::{BinDecoder, BinReader};
use ocodec_core::binfmt_write::{BinEncoder, BinWriter};
use ocodec_core::bplist::{BplistDecoder, BplistReader, Decoded, tag};
use ocodec_core::json::{JsonParser, JsonReader};
use ocodec_core::json_write::{JsonEncoder, JsonWriter};
use ocodec_core::{Error, Format, Kind, Registry, Value, WriteFormat, Writer};

/// Renders the kind of the root only; enough to exercise registration.
struct KindOnly;

impl Writer for KindOnly {
    fn write(&self, value: &Value, sink: &mut dyn Write, _deflate: bool) -> Result<usize, Error> {
        let text = format!("<{:?}/>", value.kind());
        sink.write_all(text.as_bytes())?;
        Ok(text.len())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn sample() -> Value {
    Value::dictionary_from([
        ("title", Value::string("report")),
        ("pages", Value::number(12u8)),
        ("tags", Value::array_from([Value::string("a"), Value::string("b")])),
    ])
}

#[test]
fn detect_each_builtin_format() {
    let reg = Registry::default();
    for format in [Format::Bin, Format::Bplist, Format::Json] {
        let bytes = ocodec_core::write_to_bytes(&sample(), format).unwrap();
        let mut cur = Cursor::new(bytes);
        assert_eq!(reg.detect(&mut cur).unwrap(), Some(format));
        assert_eq!(cur.stream_position().unwrap(), 0);
        assert_eq!(reg.read(&mut cur).unwrap(), sample());
    }
}

#[test]
fn probe_orders_by_score() {
    let reg = Registry::default();
    assert_eq!(reg.probe(b"tbo00\x70"), vec![(Format::Bin, 80), (Format::Json, 10)]);
    assert_eq!(reg.probe(b"[1]"), vec![(Format::Json, 50)]);
    assert!(reg.probe(&[0u8, 1, 2]).is_empty());
}

#[test]
fn read_failures() {
    let empty = Registry::new();
    assert!(matches!(
        empty.read(&mut Cursor::new(b"[1]".to_vec())),
        Err(Error::UnknownFormat)
    ));
    // both candidates fail; the last error is reported
    let reg = Registry::default();
    assert!(matches!(
        reg.read(&mut Cursor::new(b"tbo00\x43ab".to_vec())),
        Err(Error::Syntax { .. })
    ));
    assert!(matches!(
        reg.read_as(Format::Xplist, &mut Cursor::new(Vec::new())),
        Err(Error::FormatUnavailable(Format::Xplist))
    ));
}

#[test]
fn unregistered_formats_are_unavailable() {
    let mut reg = Registry::default();
    let mut sink = Vec::new();
    assert!(matches!(
        reg.write(&sample(), &mut sink, Format::Xml),
        Err(Error::FormatUnavailable(Format::Xml))
    ));
    assert!(reg.has_writer(Format::Bplist));
    assert!(reg.unregister_format(Format::Bplist));
    assert!(!reg.unregister_format(Format::Bplist));
    assert!(!reg.has_reader(Format::Bplist));
    assert_eq!(reg.formats(), vec![Format::Bin, Format::Json]);
    assert!(matches!(
        reg.write(&sample(), &mut sink, Format::Bplist),
        Err(Error::FormatUnavailable(Format::Bplist))
    ));
}

#[test]
fn custom_writer_registration() {
    let mut reg = Registry::default();
    reg.register_format(Format::Xml, None, Some(Box::new(KindOnly)));
    assert!(reg.has_writer(Format::Xml));
    assert!(!reg.has_reader(Format::Xml));
    let mut out = Vec::new();
    let n = reg.write(&sample(), &mut out, Format::Xml).unwrap();
    assert_eq!(out, b"<Dictionary/>");
    assert_eq!(n, out.len());
    assert!(reg.writer_mut::<KindOnly>(Format::Xml).is_some());
    assert_eq!(
        reg.formats(),
        vec![Format::Bin, Format::Bplist, Format::Xml, Format::Json]
    );
}

#[test]
fn format_names_and_write_bits() {
    assert_eq!("BPLIST".parse::<Format>().unwrap(), Format::Bplist);
    assert!(matches!("yaml".parse::<Format>(), Err(Error::UnknownFormat)));
    assert_eq!(Format::from_id(5).unwrap(), Format::Json);
    assert!(matches!(Format::from_id(9), Err(Error::UnknownFormatId(9))));

    let wf = WriteFormat::deflated(Format::Json);
    assert_eq!(wf.bits(), 0x105);
    assert_eq!(WriteFormat::from_bits(0x105).unwrap(), wf);
    assert_eq!(WriteFormat::from_bits(0x002).unwrap(), WriteFormat::new(Format::Bplist));
}

fn read_at_word(p: &mut JsonParser<'_>) -> Result<Value, Error> {
    p.bump();
    while p.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
        p.bump();
    }
    Ok(Value::date(0))
}

fn write_date_as_number(enc: &mut JsonEncoder<'_>, v: &Value, _level: usize) -> Result<(), Error> {
    enc.push_str(&v.as_date().unwrap_or_default().to_string());
    Ok(())
}

#[test]
fn json_hooks_extend_reader_and_writer() {
    let mut reg = Registry::default();
    assert!(
        reg.reader_mut::<JsonReader>(Format::Json)
            .unwrap()
            .hook(b'@', read_at_word)
            .is_none()
    );
    reg.writer_mut::<JsonWriter>(Format::Json)
        .unwrap()
        .hook(Kind::Date, write_date_as_number);
    // wrong concrete type
    assert!(reg.reader_mut::<BinReader>(Format::Json).is_none());

    let v = reg.read_as(Format::Json, &mut Cursor::new(b"[@epoch, 1]".to_vec())).unwrap();
    assert_eq!(v.get(0).and_then(|d| d.as_date()), Some(0));

    let mut out = Vec::new();
    reg.write(&Value::array_from([Value::date(42)]), &mut out, WriteFormat::deflated(Format::Json))
        .unwrap();
    assert_eq!(out, b"[42]");

    reg.writer_mut::<JsonWriter>(Format::Json).unwrap().unhook(Kind::Date);
    assert!(reg.write(&Value::date(1), &mut out, Format::Json).is_err());
}

fn null_as_nil(enc: &mut BinEncoder<'_>, _v: &Value) -> Result<(), Error> {
    enc.write_type_size(Kind::String.id() as u16, 3);
    enc.write_xor(b"nil");
    Ok(())
}

fn decode_type_nine(d: &mut BinDecoder<'_>, _ty: u16, size: u64) -> Result<Value, Error> {
    let b = d.read_slice(size as usize)?;
    Ok(Value::data(b.to_vec()))
}

#[test]
fn bin_hooks() {
    let mut reg = Registry::default();
    reg.writer_mut::<BinWriter>(Format::Bin)
        .unwrap()
        .hook(Kind::Null, null_as_nil);
    let bytes = ocodec_core::write_to_bytes(&Value::null(), Format::Bin).unwrap();
    assert_eq!(bytes, b"tbo00\x80");
    let mut hooked = Vec::new();
    reg.write(&Value::array_from([Value::null()]), &mut hooked, Format::Bin)
        .unwrap();
    let back = ocodec_core::read_from_bytes(&hooked).unwrap();
    assert_eq!(back.get(0).and_then(|s| s.to_string_value()).as_deref(), Some("nil"));

    // type 9 is not a kind; without a hook it is rejected
    let doc = b"tbo00\x92\xAB\xCD";
    assert!(matches!(
        BinReader::default().decode(doc),
        Err(Error::UnknownType { tag: 9, .. })
    ));
    reg.reader_mut::<BinReader>(Format::Bin)
        .unwrap()
        .hook(9, decode_type_nine);
    let v = reg.read(&mut Cursor::new(doc.to_vec())).unwrap();
    assert_eq!(v.as_bytes().as_deref(), Some(&[0xAB, 0xCD][..]));
}

fn uid_as_string(d: &mut BplistDecoder<'_>, _tag: u8, info: u8) -> Result<Decoded, Error> {
    let bytes = d.read_slice(info as usize + 1)?;
    Ok(Decoded::Value(Value::string(format!("uid:{}", bytes[bytes.len() - 1]))))
}

#[test]
fn bplist_read_hook_replaces_uid_decoding() {
    let v = Value::array_from([Value::dictionary_from([("CF$UID", Value::number(7u8))])]);
    let bytes = ocodec_core::write_to_bytes(&v, Format::Bplist).unwrap();
    let mut reg = Registry::default();
    reg.reader_mut::<BplistReader>(Format::Bplist)
        .unwrap()
        .hook(tag::UID, uid_as_string);
    let back = reg.read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(back.get(0).and_then(|s| s.to_string_value()).as_deref(), Some("uid:7"));
}

#[test]
fn url_io_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.bplist");
    let path_str = path.to_str().unwrap();
    let n = ocodec_core::write_to_url(&sample(), path_str, Format::Bplist).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), n as u64);

    let back = ocodec_core::read_from_url(&format!("file://{}", path_str)).unwrap();
    assert_eq!(back, sample());
    assert!(matches!(
        ocodec_core::read_from_url("http://example.com/doc.json"),
        Err(Error::UnsupportedUrl(_))
    ));
    assert!(matches!(
        ocodec_core::read_from_url(dir.path().join("missing").to_str().unwrap()),
        Err(Error::Open { .. })
    ));
}

#[test]
fn dump_and_data_wrapping() {
    let v = Value::array_from([Value::number(1u8)]);
    let hex = ocodec_core::to_dump_string(&v, Format::Bin).unwrap();
    assert!(hex.starts_with("00000000  74 62 6f 30 30"));
    assert!(hex.ends_with("|tbo001Q.|\n"));

    let text = ocodec_core::to_dump_string(&v, WriteFormat::deflated(Format::Json)).unwrap();
    assert_eq!(text, "[1]");

    let wrapped = ocodec_core::to_data_value(&v, Format::Bin).unwrap();
    assert_eq!(wrapped.kind(), Kind::Data);
    assert!(wrapped.as_bytes().unwrap().starts_with(b"tbo00"));
}

#[test]
fn find_documents_under_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), b"{\"x\": 1}").unwrap();
    ocodec_core::write_to_url(&sample(), dir.path().join("b.bin").to_str().unwrap(), Format::Bin)
        .unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    ocodec_core::write_to_url(
        &sample(),
        dir.path().join("nested/c.plist").to_str().unwrap(),
        Format::Bplist,
    )
    .unwrap();
    std::fs::write(dir.path().join("junk.raw"), [0u8, 1, 2, 3]).unwrap();

    let found = ocodec_core::find_documents(&Registry::default(), dir.path());
    let names: Vec<(String, Format)> = found
        .iter()
        .map(|(p, f)| {
            let rel = p.strip_prefix(dir.path()).unwrap();
            (rel.to_string_lossy().replace('\\', "/"), *f)
        })
        .collect();
    assert_eq!(
        names,
        vec![
            ("a.json".to_string(), Format::Json),
            ("b.bin".to_string(), Format::Bin),
            ("nested/c.plist".to_string(), Format::Bplist),
        ]
    );
}

#[test]
fn json_interop_with_serde() {
    let v = sample();
    let j = ocodec_core::to_json(&v).unwrap();
    assert_eq!(
        j,
        serde_json::json!({"title": "report", "pages": 12, "tags": ["a", "b"]})
    );
    let text = ocodec_core::to_dump_string(&v, Format::Json).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, j);
    assert_eq!(ocodec_core::from_json(&parsed), v);
    assert!(matches!(
        ocodec_core::to_json(&Value::date(0)),
        Err(Error::UnsupportedKind { kind: Kind::Date, .. })
    ));
}
