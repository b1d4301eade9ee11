use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dnpsync::{reconcile, Board, Schematic};
use std::fmt::Write;
use std::path::Path;

const PARTS: usize = 2000;

/// Every third part is DNP, every seventh carries a malformed legacy tag.
fn synthetic_project() -> (String, String) {
    let mut sch = String::from("(kicad_sch (version 20231120) (generator \"eeschema\")\n");
    let mut pcb = String::from("(kicad_pcb (version 20240108) (generator \"pcbnew\")\n");

    for i in 0..PARTS {
        let dnp = i % 3 == 0;
        let tag = if i % 7 == 0 { " (property \"DNP\" \"DNP\")" } else { "" };
        let yn = |b: bool| if b { "yes" } else { "no" };
        writeln!(
            sch,
            "  (symbol (lib_id \"Device:R\") (at {} 0 0) (unit 1) (in_bom {}) (on_board yes) (dnp {})\n    (property \"Reference\" \"R{}\" (at 0 0 0)){})",
            i,
            yn(!dnp),
            yn(dnp),
            i,
            tag
        )
        .unwrap();

        let attr = if dnp { "smd exclude_from_pos_files exclude_from_bom" } else { "smd" };
        writeln!(
            pcb,
            "  (footprint \"Resistor_SMD:R_0603\" (layer \"F.Cu\") (at {} 0)\n    (property \"Reference\" \"R{}\" (at 0 -1.43 0) (layer \"F.SilkS\"))\n    (attr {})\n    (pad \"1\" smd roundrect (at -0.825 0) (size 0.8 0.95) (layers \"F.Cu\" \"F.Paste\" \"F.Mask\"))\n    (pad \"2\" smd roundrect (at 0.825 0) (size 0.8 0.95) (layers \"F.Cu\" \"F.Paste\" \"F.Mask\")))",
            i, i, attr
        )
        .unwrap();
    }
    sch.push_str(")\n");
    pcb.push_str(")\n");
    (sch, pcb)
}

fn bench_parse(c: &mut Criterion) {
    let (sch, pcb) = synthetic_project();

    c.bench_function("parse_board", |b| {
        b.iter(|| Board::parse(Path::new("bench.kicad_pcb"), black_box(&pcb)))
    });
    c.bench_function("parse_schematic", |b| {
        b.iter(|| Schematic::parse(Path::new("bench.kicad_sch"), black_box(&sch)))
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let (sch, pcb) = synthetic_project();
    let schematic = Schematic::parse(Path::new("bench.kicad_sch"), &sch).unwrap();
    let board = Board::parse(Path::new("bench.kicad_pcb"), &pcb).unwrap();

    c.bench_function("reconcile", |b| {
        b.iter(|| {
            let mut schematic = schematic.clone();
            let mut board = board.clone();
            reconcile(black_box(&mut schematic), black_box(&mut board))
        })
    });
}

criterion_group!(benches, bench_parse, bench_reconcile);
criterion_main!(benches);
