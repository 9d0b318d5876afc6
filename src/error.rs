use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

// Loader errors

pub fn parse_not_binary(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::bad_word",
        help = "instruction words are written in binary digits, like 10000010",
        labels = vec![LabeledSpan::at(span, "not a binary word")],
        "Encountered an invalid instruction word.",
    )
    .with_source_code(src)
}

pub fn parse_word_too_long(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::word_len",
        help = "LS-8 instruction words are at most 8 bits wide",
        labels = vec![LabeledSpan::at(span, "word is too long")],
        "Encountered an instruction word wider than a byte.",
    )
    .with_source_code(src)
}

pub fn parse_split_word(span: Span, src: &'static str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "parse::split_word",
        help = "write one instruction word per line, with comments after a #",
        labels = vec![LabeledSpan::at(span, "more than one word")],
        "Expected a single instruction word on this line.",
    )
    .with_source_code(src)
}
