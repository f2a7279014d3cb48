use criterion::{black_box, criterion_group, criterion_main, Criterion};
use slirc_bot::Message;

fn bench_parsing(c: &mut Criterion) {
    let lines = [
        "PING :irc.example.com",
        ":nick!user@host PRIVMSG #channel :Hello, world!",
        ":srv 353 me = #channel :@alice +bob carol dave eve frank grace",
        ":srv 005 me PREFIX=(qaohv)~&@%+ CHANTYPES=# NETWORK=Example :are supported by this server",
        ":nick!user@host PRIVMSG #channel :\u{1}ACTION waves at everyone in the room\u{1}",
    ];

    c.bench_function("parse_lines", |b| {
        b.iter(|| {
            for line in &lines {
                let _ = black_box(Message::parse(black_box(line)));
            }
        })
    });

    c.bench_function("parse_encode_round_trip", |b| {
        let parsed: Vec<Message> = lines.iter().map(|l| Message::parse(l).unwrap()).collect();

        b.iter(|| {
            for message in &parsed {
                black_box(message.to_string());
            }
        })
    });
}

criterion_group!(benches, bench_parsing);
criterion_main!(benches);
