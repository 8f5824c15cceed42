//! Benchmarks for the hot paths of an SMTP session:
//! - verb lookup and command line splitting
//! - MAIL/RCPT parameter parsing
//! - reply and trace header formatting
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{hint::black_box, net::IpAddr};

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use postern_common::status::Status;
use postern_smtp::{
    command::{self, Verb},
    extensions::Extension,
    received::{Received, TransmissionType},
    reply::Reply,
};

// ============================================================================
// Command Line Benchmarks
// ============================================================================

fn bench_command_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_lines");

    let lines = vec![
        ("QUIT", "QUIT"),
        ("noop", "lowercase NOOP"),
        ("EHLO mail.example.com", "EHLO with hostname"),
        ("MAIL FROM:<user@example.com> SIZE=12345", "MAIL FROM with SIZE"),
        ("XUNKNOWN argument", "unknown verb"),
    ];

    for (line, desc) in lines {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::new("split_lookup", desc), &line, |b, &line| {
            b.iter(|| {
                let (verb, arguments) = command::split(black_box(line));
                black_box((Verb::lookup(verb), arguments))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Argument Parsing Benchmarks
// ============================================================================

fn bench_mail_from(c: &mut Criterion) {
    let mut group = c.benchmark_group("mail_from");
    let extensions = Extension::ALL.to_vec();

    let arguments = vec![
        ("FROM:<user@example.com>", "no_params"),
        ("FROM:<>", "null_sender"),
        ("FROM:<user@example.com> SIZE=12345", "single_param"),
        ("FROM:<user@example.com> SIZE=12345 BODY=8BITMIME", "two_params"),
        (
            "FROM:<user@example.com> SIZE=12345 BODY=BINARYMIME AUTH=<> RET=FULL ENVID=xyz",
            "many_params",
        ),
        ("from:<user@example.com> size=12345 body=8bitmime", "lowercase_params"),
    ];

    for (args, desc) in arguments {
        group.throughput(Throughput::Bytes(args.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(desc), &args, |b, &args| {
            b.iter(|| black_box(command::parse_mail_from(black_box(args), &extensions, 10_000_000)));
        });
    }

    group.finish();
}

fn bench_rcpt_to(c: &mut Criterion) {
    let mut group = c.benchmark_group("rcpt_to");
    let extensions = Extension::ALL.to_vec();

    let arguments = vec![
        ("TO:<recipient@example.com>", "no_params"),
        (
            "TO:<recipient@example.com> NOTIFY=SUCCESS,FAILURE,DELAY ORCPT=rfc822;recipient@example.com",
            "dsn_params",
        ),
    ];

    for (args, desc) in arguments {
        group.bench_with_input(BenchmarkId::from_parameter(desc), &args, |b, &args| {
            b.iter(|| black_box(command::parse_rcpt_to(black_box(args), &extensions)));
        });
    }

    group.bench_function("bdat", |b| {
        b.iter(|| black_box(command::parse_bdat(black_box("65536 LAST"))));
    });

    group.finish();
}

// ============================================================================
// Formatting Benchmarks
// ============================================================================

fn bench_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("formatting");

    let ok = Reply::ok();
    group.bench_function("single_line_reply", |b| {
        b.iter(|| black_box(black_box(&ok).to_string()));
    });

    let ehlo = Reply::new(
        Status::Ok,
        [
            "mx.example.org",
            "PIPELINING",
            "SIZE 10000000",
            "STARTTLS",
            "8BITMIME",
            "BINARYMIME",
            "CHUNKING",
            "AUTH PLAIN LOGIN",
        ],
    );
    group.bench_function("ehlo_reply", |b| {
        b.iter(|| black_box(black_box(&ehlo).to_string()));
    });

    let received = Received {
        from: "client.example.com",
        peer: IpAddr::from([192, 0, 2, 7]),
        by: "mx.example.org",
        with: TransmissionType::of(true, true),
        at: Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap(),
    };
    group.bench_function("received_header", |b| {
        b.iter(|| black_box(black_box(&received).to_string()));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_command_lines,
    bench_mail_from,
    bench_rcpt_to,
    bench_formatting,
);
criterion_main!(benches);
