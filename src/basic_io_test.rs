use super::*;

#[test]
fn test_printer_alignment() {
    let mut st = Stanza::new();
    st.push_str("conflict", "duplicate_name");
    st.push_str("left_type", "added file");
    st.push_hex("left_file_id", "8a42");

    let mut pr = Printer::new();
    pr.push_stanza(&st);
    let text = pr.unwrap();

    let expect = "\
    conflict \"duplicate_name\"
   left_type \"added file\"
left_file_id [8a42]

";
    assert_eq!(text, expect);
}

#[test]
fn test_escapes() {
    let mut st = Stanza::new();
    st.push_str("value", "a \"quoted\" back\\slash");

    let mut pr = Printer::new();
    pr.push_stanza(&st);
    let text = pr.unwrap();
    assert_eq!(text, "value \"a \\\"quoted\\\" back\\\\slash\"\n\n");

    let mut pars = Parser::new(&text).unwrap();
    pars.esym("value").unwrap();
    assert_eq!(pars.str_val().unwrap(), "a \"quoted\" back\\slash");
    assert!(pars.eof());
}

#[test]
fn test_parser_round_trip() {
    let mut st1 = Stanza::new();
    st1.push_str("dir", "");
    let mut st2 = Stanza::new();
    st2.push_str("file", "foo/bar");
    st2.push_hex("content", "deadbeef");
    st2.push_multi(
        "attr",
        vec![Value::Str("mtn:execute".to_string()), Value::Str("true".to_string())],
    );

    let mut pr = Printer::new();
    pr.push_stanza(&st1);
    pr.push_stanza(&st2);
    let text = pr.unwrap();

    let mut pars = Parser::new(&text).unwrap();
    pars.esym("dir").unwrap();
    assert_eq!(pars.str_val().unwrap(), "");
    pars.esym("file").unwrap();
    assert_eq!(pars.str_val().unwrap(), "foo/bar");
    pars.esym("content").unwrap();
    assert_eq!(pars.hex_val().unwrap(), "deadbeef");
    assert!(pars.symp("attr"));
    pars.esym("attr").unwrap();
    assert_eq!(pars.str_val().unwrap(), "mtn:execute");
    assert_eq!(pars.str_val().unwrap(), "true");
    assert!(pars.eof());
}

#[test]
fn test_parser_errors() {
    // unterminated string
    assert!(Parser::new("key \"abc").is_err());
    // bad hex
    assert!(Parser::new("key [xyz]").is_err());
    // bad escape
    assert!(Parser::new("key \"a\\qb\"").is_err());

    let mut pars = Parser::new("alpha \"1\"").unwrap();
    let err = pars.esym("beta").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("expected 'beta'"), "{}", msg);
    assert!(msg.contains("alpha"), "{}", msg);
}

#[test]
fn test_embedded_newline() {
    let mut st = Stanza::new();
    st.push_str("body", "line one\nline two");
    let mut pr = Printer::new();
    pr.push_stanza(&st);

    let text = pr.unwrap();
    let mut pars = Parser::new(&text).unwrap();
    pars.esym("body").unwrap();
    assert_eq!(pars.str_val().unwrap(), "line one\nline two");
}
