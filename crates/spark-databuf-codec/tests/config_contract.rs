//! 编解码配置契约测试：行解码器配置与编组提示可从 TOML 加载，缺省字段回落到默认值。

use spark_databuf::Charset;
use spark_databuf_codec::{ByteOrder, CodecHints, LineDecoder, LineDecoderConfig};

#[test]
fn line_decoder_config_loads_from_toml() {
    let config: LineDecoderConfig = toml::from_str(
        r#"
        delimiters = [";"]
        emit_trailing = false
        "#,
    )
    .unwrap();
    assert_eq!(config.delimiters, [";"]);
    assert!(config.strip_delimiter);
    assert!(!config.emit_trailing);
    assert_eq!(config.max_in_memory_size, 256 * 1024);
    assert!(LineDecoder::with_config(config).is_ok());
}

#[test]
fn empty_delimiter_list_fails_validation() {
    let config: LineDecoderConfig = toml::from_str("delimiters = []").unwrap();
    assert!(LineDecoder::with_config(config).is_err());
}

#[test]
fn codec_hints_load_from_toml() {
    let hints: CodecHints = toml::from_str(
        r#"
        charset = "ISO-8859-1"
        pretty_print = true

        [extra]
        indent = "2"
        "#,
    )
    .unwrap();
    assert_eq!(hints.charset, Charset::Iso8859_1);
    assert!(hints.pretty_print);
    assert_eq!(hints.extra("indent"), Some("2"));
    assert_eq!(toml::from_str::<CodecHints>("").unwrap(), CodecHints::default());
    assert!(toml::from_str::<CodecHints>("indent = 2").is_err());
}

#[test]
fn byte_order_uses_snake_case_names() {
    #[derive(serde::Deserialize)]
    struct Wire {
        order: ByteOrder,
    }
    let wire: Wire = toml::from_str(r#"order = "little_endian""#).unwrap();
    assert_eq!(wire.order, ByteOrder::LittleEndian);
}
