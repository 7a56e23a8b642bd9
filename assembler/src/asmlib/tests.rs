// Assembler tests: whole programs in, word images out.

use base::instruction::{AC_SHIFT, INDEX_SHIFT, OPCODE_SHIFT};
use base::prelude::Unsigned36Bit;

use debugger::Debugger;

use super::driver::{assemble_source, Assembly, Options};
use super::types::AssemblerFailure;

fn assemble(text: &str) -> Assembly {
    let mut host = Debugger::with_buffered_console();
    assemble_source(text, Some(0), &Options::default(), &mut host)
        .expect("assembly should succeed")
}

fn assemble_err(text: &str) -> AssemblerFailure {
    let mut host = Debugger::with_buffered_console();
    assemble_source(text, Some(0), &Options::default(), &mut host)
        .expect_err("assembly should fail")
}

fn words_of(assembly: &Assembly) -> Vec<u64> {
    assembly.words.iter().map(|w| u64::from(*w)).collect()
}

fn w(n: u64) -> Unsigned36Bit {
    Unsigned36Bit::truncating_from(n)
}

#[test]
fn test_empty_program() {
    let a = assemble("END");
    assert!(a.words.is_empty());
    assert_eq!(a.start, None);
}

#[test]
fn test_label_redefinition_is_fatal() {
    let e = assemble_err("A: 0\nA: 0\nEND");
    let msg = e.to_string();
    assert!(msg.contains("label A redefined"), "got: {msg}");
    assert!(msg.contains("error at line 2"), "got: {msg}");
}

#[test]
fn test_literal_collapsing() {
    let a = assemble(concat!(
        "HRRZI 1,[135531,,246642]\n",
        "CAIE 1,[135531,,246642]\n",
        "END",
    ));
    // One shared literal word after the two instructions.
    assert_eq!(
        words_of(&a),
        vec![
            (0o551 << OPCODE_SHIFT) | (1 << AC_SHIFT) | 2,
            (0o302 << OPCODE_SHIFT) | (1 << AC_SHIFT) | 2,
            (0o135_531 << 18) | 0o246_642,
        ]
    );
}

#[test]
fn test_distinct_literals_do_not_collapse() {
    let a = assemble(concat!(
        "HRRZI 1,[0]\n",
        "CAIE 1,[ASCIZ/TEST1/]\n",
        "END",
    ));
    // [0] lands at 2; the ASCIZ takes 3 and 4.  The zero word that
    // ends the ASCIZ must not be confused with [0], whose word has a
    // deferred expression attached.
    assert_eq!(a.words.len(), 5);
    let words = words_of(&a);
    assert_eq!(words[0] & 0o777_777, 2);
    assert_eq!(words[1] & 0o777_777, 3);
    assert_eq!(words[2], 0);
    assert_eq!(
        words[3],
        (0o124 << 29) | (0o105 << 22) | (0o123 << 15) | (0o124 << 8) | (0o61 << 1)
    );
    assert_eq!(words[4], 0);
}

#[test]
fn test_xwd_and_double_comma_agree() {
    let a = assemble("XWD 1,2\nEXP 1,,2\nEND");
    assert_eq!(words_of(&a), vec![(1 << 18) | 2, (1 << 18) | 2]);
}

#[test]
fn test_asciz_termination() {
    let a = assemble("ASCIZ /AB/\nEND");
    assert_eq!(words_of(&a), vec![(0o101 << 29) | (0o102 << 22)]);
    // Five characters fill a word; the terminator needs a second.
    let a = assemble("ASCIZ /ABCDE/\nEND");
    assert_eq!(a.words.len(), 2);
    assert_eq!(u64::from(a.words[1]), 0);
}

#[test]
fn test_sixbit_case_fold() {
    let a = assemble("SIXBIT /ab/\nEND");
    assert_eq!(
        words_of(&a),
        vec![(((0o101 + 0o40) & 0o77) << 30) | (((0o102 + 0o40) & 0o77) << 24)]
    );
}

#[test]
fn test_ascii_spanning_lines() {
    let a = assemble("ASCIZ /AB\nCD/\nEND");
    // The line break is two characters of text.
    assert_eq!(
        words_of(&a),
        vec![
            (0o101 << 29) | (0o102 << 22) | (0o15 << 15) | (0o12 << 8) | (0o103 << 1),
            0o104 << 29,
        ]
    );
}

#[test]
fn test_repeat() {
    let a = assemble("REPEAT 3 <EXP 5>\nEND");
    assert_eq!(words_of(&a), vec![5, 5, 5]);
}

#[test]
fn test_conditionals() {
    assert_eq!(words_of(&assemble("IFE 0 <EXP 1>\nEND")), vec![1]);
    assert!(assemble("IFE 1 <EXP 1>\nEND").words.is_empty());
    assert_eq!(words_of(&assemble("IFN 1 <EXP 2>\nEND")), vec![2]);
    assert!(assemble("IFN 0 <EXP 2>\nEND").words.is_empty());
    assert_eq!(words_of(&assemble("IFG 1 <EXP 3>\nEND")), vec![3]);
    assert!(assemble("IFL 1 <EXP 3>\nEND").words.is_empty());
}

#[test]
fn test_loc_places_words() {
    let a = assemble("LOC 1000\nNOP\nEND");
    assert_eq!(a.words.len(), 0o1001);
    assert_eq!(a.word_at(0o1000), Some(w(0o600_000_000_000)));
    assert_eq!(a.word_at(0o777), Some(w(0)));
}

#[test]
fn test_end_to_end_image_and_start() {
    let a = assemble("LOC 1000\nSTART: EXP 1,,2\nEND START");
    assert_eq!(a.start, Some(0o1000));
    assert_eq!(a.word_at(0o1000), Some(w(0o000_001_000_002)));
}

#[test]
fn test_end_without_operand_has_no_start() {
    assert_eq!(assemble("EXP 1\nEND").start, None);
}

#[test]
fn test_host_variables_roundtrip() {
    let mut host = Debugger::with_buffered_console();
    host.set_variable("KEEP", 42);
    assemble_source("A: 0\nKEEP=1\nEND", Some(0), &Options::default(), &mut host)
        .expect("assembly should succeed");
    assert_eq!(host.get_variable("KEEP"), Some(42));
    assert_eq!(host.get_variable("A"), None);

    // The failure path restores too.
    assemble_source("A: 0\nA: 0\nEND", Some(0), &Options::default(), &mut host)
        .expect_err("assembly should fail");
    assert_eq!(host.get_variable("KEEP"), Some(42));
}

#[test]
fn test_define_and_invoke() {
    let a = assemble(concat!(
        "DEFINE INCR(X)<AOS 0,X>\n",
        "INCR (CNT)\n",
        "CNT: 0\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![(0o350 << OPCODE_SHIFT) | 1, 0]);
}

#[test]
fn test_macro_concatenation_operator() {
    let a = assemble(concat!(
        "DEFINE TAG(A)<EXP A'5>\n",
        "TAG (1)\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![0o15]);
}

#[test]
fn test_macro_default_parameter() {
    let a = assemble(concat!(
        "DEFINE PAIR(A,B<77>)<XWD A,B>\n",
        "PAIR (1)\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![(1 << 18) | 0o77]);
}

#[test]
fn test_repeat_inside_macro() {
    let a = assemble(concat!(
        "DEFINE DUP(N,X)<REPEAT N,<EXP X>>\n",
        "DUP (2,3)\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![3, 3]);
}

#[test]
fn test_irp() {
    // The comma list must be angle-bracket protected to reach L as
    // one value; SUM (1,2,3) would bind L to 1 alone.
    let a = assemble(concat!(
        "DEFINE SUM(L)<IRP L,<EXP L>>\n",
        "SUM <1,2,3>\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![1, 2, 3]);
}

#[test]
fn test_irp_multi_character_items() {
    // A protected list in a bare (paren-free) call, with items wider
    // than one character.
    let a = assemble(concat!(
        "DEFINE GEN(L)<IRP L,<EXP L>>\n",
        "GEN <10,20,30>\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![0o10, 0o20, 0o30]);
}

#[test]
fn test_irpc() {
    let a = assemble(concat!(
        "DEFINE DIG(N)<IRPC N,<EXP N>>\n",
        "DIG (123)\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![1, 2, 3]);
}

#[test]
fn test_opdef() {
    let a = assemble(concat!(
        "OPDEF CALL [JSP 1,0]\n",
        "CALL SUB(2)\n",
        "SUB: 0\n",
        "END",
    ));
    assert_eq!(
        words_of(&a),
        vec![
            (0o265 << OPCODE_SHIFT) | (1 << AC_SHIFT) | (2 << INDEX_SHIFT) | 1,
            0,
        ]
    );
}

#[test]
fn test_reserved_symbols() {
    let a = assemble(concat!(
        "MOVE 1,COUNT#\n",
        "MOVE 2,COUNT#\n",
        "END",
    ));
    // COUNT materialises once, after the main text.
    assert_eq!(
        words_of(&a),
        vec![
            (0o200 << OPCODE_SHIFT) | (1 << AC_SHIFT) | 2,
            (0o200 << OPCODE_SHIFT) | (2 << AC_SHIFT) | 2,
            0,
        ]
    );
}

#[test]
fn test_listing_controls_are_ignored() {
    let a = assemble(concat!(
        "TITLE DAKAA PDP-10 DIAGNOSTIC\n",
        "SUBTTL ARITHMETIC\n",
        "LIST\n",
        "XLIST\n",
        "PAGE\n",
        "EXP 7\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![7]);
}

#[test]
fn test_current_location() {
    let a = assemble("LOC 100\nEXP .\nJRST .\nEND");
    // `.` defers in EXP and resolves against the word's own address;
    // in an instruction it is substituted as the line is encoded.
    assert_eq!(a.word_at(0o100), Some(w(0o100)));
    assert_eq!(
        a.word_at(0o101),
        Some(w((0o254 << OPCODE_SHIFT) | 0o101))
    );
}

#[test]
fn test_assignment_forms() {
    let a = assemble(concat!(
        "FOO=10\n",
        "BAR==FOO+1\n",
        "BAZ=:BAR-1\n",
        "EXP FOO,,BAZ\n",
        "END",
    ));
    assert_eq!(words_of(&a), vec![(0o10 << 18) | 0o10]);
}

#[test]
fn test_sixbit_in_expression() {
    let a = assemble("EXP SIXBIT /A/\nEND");
    assert_eq!(words_of(&a), vec![0o41 << 30]);
}

#[test]
fn test_preprocess_option_echoes_source() {
    let mut host = Debugger::with_buffered_console();
    let a = assemble_source(
        "EXP 1\nEND",
        Some(0),
        &Options::from_letters("p"),
        &mut host,
    )
    .expect("preprocessing should succeed");
    assert!(a.words.is_empty());
    let lines = host.take_console_lines();
    assert!(lines.iter().any(|l| l == "EXP 1"), "got: {lines:?}");
}

#[test]
fn test_unterminated_macro_body() {
    let e = assemble_err("REPEAT 2 <EXP 1\nEND");
    let msg = e.to_string();
    assert!(msg.contains("error at line 1"), "got: {msg}");
}

#[test]
fn test_unterminated_literal() {
    let e = assemble_err("MOVE 1,[3\nEND");
    assert!(e.to_string().contains("error at line 1"));
}

#[test]
fn test_undefined_symbol_is_reported() {
    let e = assemble_err("EXP NOWHERE\nEND");
    let msg = e.to_string();
    assert!(msg.contains("error at line 1"), "got: {msg}");
    assert!(msg.contains("NOWHER"), "got: {msg}");
}

#[test]
fn test_truncation_warns_but_continues() {
    let mut host = Debugger::with_buffered_console();
    let a = assemble_source(
        "EXP 400000000000+400000000000\nEND",
        Some(0),
        &Options::default(),
        &mut host,
    )
    .expect("assembly should succeed");
    assert_eq!(u64::from(a.words[0]), 0);
    let lines = host.take_console_lines();
    assert!(
        lines.iter().any(|l| l.starts_with("warning at line 1")),
        "got: {lines:?}"
    );
}

#[test]
fn test_load_address_offsets_image() {
    let mut host = Debugger::with_buffered_console();
    let a = assemble_source("EXP 7\nEND", Some(0o400), &Options::default(), &mut host)
        .expect("assembly should succeed");
    assert_eq!(a.load_address, 0o400);
    assert_eq!(a.word_at(0o400), Some(w(7)));
    assert_eq!(a.words.len(), 1);
}
