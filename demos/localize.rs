// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use clap::{Parser, ValueEnum};
use culprit::ir::{Context, ExprRef};
use culprit::localize::CombineMethod;
use culprit::maxsat::{EnumerativeMaxSat, MaxSatEngine, SmtMaxSat, BITWUZLA_CMD, YICES2_CMD, Z3_CMD};
use culprit::program::*;
use culprit::weight::Granularity;
use culprit::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "localize")]
#[command(author = "Kevin Laeufer <laeufer@cornell.edu>")]
#[command(version)]
#[command(about = "Localizes the fault in a small distance function.", long_about = None)]
struct Args {
    #[arg(long, value_enum, default_value = "enumerate")]
    solver: Solver,
    #[arg(
        long,
        help = "Weights as `key=value` pairs, e.g. `neutral=5,found=30`.",
        default_value = ""
    )]
    weights: WeightTable,
    #[arg(long, help = "Solver timeout in seconds.", default_value_t = 60)]
    timeout: u64,
    #[arg(long, help = "Group the constraints of each statement.")]
    per_statement: bool,
    #[arg(long, help = "Also list alternative diagnoses.")]
    diagnoses: bool,
    #[arg(short, default_value_t = 9)]
    a: u64,
    #[arg(short, default_value_t = 3)]
    b: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Solver {
    Enumerate,
    Bitwuzla,
    Yices2,
    Z3,
}

const SOURCE: &str = "\
int distance(int a, int b) {
  int d;
  if (a < b) {
    d = b - a;
  } else {
    d = a + b;
  }
  assert(d <= a || d <= b);
  return d;
}
";

struct Distance {
    program: Program,
    main: FunctionId,
    a: ExprRef,
    b: ExprRef,
}

fn distance(ctx: &mut Context) -> Distance {
    let a = ctx.bv_symbol("a", 8);
    let b_in = ctx.bv_symbol("b", 8);
    let d1 = ctx.bv_symbol("d1", 8);
    let d2 = ctx.bv_symbol("d2", 8);
    let d = ctx.bv_symbol("d", 8);
    let smaller = ctx.less(a, b_in);
    let b_minus_a = ctx.sub(b_in, a);
    let a_plus_b = ctx.add(a, b_in);
    let below_a = ctx.greater_or_equal(a, d);
    let below_b = ctx.greater_or_equal(b_in, d);
    let ok = ctx.or(below_a, below_b);

    let mut b = ProgramBuilder::new();
    let main = b.function("distance", &[a, b_in]);
    let entry = b.block(main);
    let then = b.block(main);
    let els = b.block(main);
    let join = b.block(main);
    b.push_at(
        entry,
        Instruction::Branch(Terminator::Cond {
            cond: smaller,
            then,
            els,
        }),
        3,
    );
    b.push_at(then, Instruction::Assign { target: d1, value: b_minus_a }, 4);
    b.push(then, Instruction::Branch(Terminator::Goto(join)));
    b.push_at(els, Instruction::Assign { target: d2, value: a_plus_b }, 6);
    b.push(els, Instruction::Branch(Terminator::Goto(join)));
    b.push_at(
        join,
        Instruction::Phi {
            target: d,
            incoming: vec![(then, d1), (els, d2)],
        },
        7,
    );
    b.push_at(join, Instruction::Assert { cond: ok }, 8);
    b.push_at(join, Instruction::Branch(Terminator::Return(vec![d])), 9);
    b.source("distance.c", SOURCE);
    Distance {
        program: b.build(ctx).expect("failed to build the distance program"),
        main,
        a,
        b: b_in,
    }
}

fn run(engine: impl MaxSatEngine, args: &Args) {
    let mut ctx = Context::default();
    let p = distance(&mut ctx);
    let mut opts = LocalizerOptions {
        timeout: Some(Duration::from_secs(args.timeout)),
        ..LocalizerOptions::default()
    };
    if args.per_statement {
        opts.assign.granularity = Granularity::Statement;
    }
    let loc = FaultLocalizer::new(engine, args.weights).with_options(opts);
    let inputs = vec![(p.a, args.a), (p.b, args.b)];
    println!("weights: {}", loc.table());
    match loc.localize_input(&mut ctx, &p.program, p.main, &inputs) {
        Ok(result) => println!("{}", render(&result, &p.program)),
        Err(LocalizeError::NoFailure) => {
            println!("distance({}, {}) passes the assertion", args.a, args.b);
            return;
        }
        Err(e) => {
            eprintln!("localization failed: {e}");
            std::process::exit(1);
        }
    }
    if args.diagnoses {
        let diagnoses = loc
            .diagnoses_of_inputs(&mut ctx, &p.program, p.main, &[inputs], CombineMethod::None)
            .expect("failed to enumerate diagnoses");
        for (ii, diagnosis) in diagnoses.iter().enumerate() {
            let stmts = diagnosis.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            println!("diagnosis {ii}: {}", stmts.join(", "));
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    match args.solver {
        Solver::Enumerate => run(EnumerativeMaxSat::default(), &args),
        Solver::Bitwuzla => run(SmtMaxSat::new(BITWUZLA_CMD), &args),
        Solver::Yices2 => run(SmtMaxSat::new(YICES2_CMD), &args),
        Solver::Z3 => run(SmtMaxSat::new(Z3_CMD), &args),
    }
}
