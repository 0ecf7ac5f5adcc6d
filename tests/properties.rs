// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use culprit::encode::{encode_path, CallPolicy, ConstraintKind, ConstraintSet, PathSpec};
use culprit::ir::{eval_bool_expr, Context, ExprRef};
use culprit::maxsat::{Budget, EnumerativeMaxSat, MaxSatEngine, MaxSatOutcome, MaxSatSession};
use culprit::program::*;
use culprit::weight::{assign_weights, AssignOptions, ConfigError, WeightTable};
use culprit::{FaultLocalizer, LocalizationResult, LocalizerOptions, Target};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

struct Fixture {
    program: Program,
    main: FunctionId,
    a: ExprRef,
    b: ExprRef,
    /// index and array parameter, if the fixture has them
    memory: Option<(ExprRef, ExprRef)>,
    check: StmtId,
}

impl Fixture {
    fn random_inputs(&self, rng: &mut impl Rng) -> Vec<(ExprRef, u64)> {
        let mut inputs = vec![(self.a, rng.gen_range(0..16)), (self.b, rng.gen_range(0..16))];
        if let Some((k, m)) = self.memory {
            inputs.push((k, rng.gen_range(0..4)));
            inputs.push((m, rng.gen_range(0..16)));
        }
        inputs
    }
}

/// `inc(x) = x + 1`, together with its contract
fn increment(ctx: &mut Context, b: &mut ProgramBuilder) -> FunctionId {
    let x = ctx.bv_symbol("x", 4);
    let res = ctx.bv_symbol("res", 4);
    let one = ctx.one(4);
    let inc_x = ctx.add(x, one);
    let inc = b.function("inc", &[x]);
    let inc_entry = b.block(inc);
    b.push(inc_entry, Instruction::Assign { target: res, value: inc_x });
    b.push(inc_entry, Instruction::Branch(Terminator::Return(vec![res])));
    let post = ctx.equal(res, inc_x);
    let pre = ctx.tru();
    b.summary(
        inc,
        Contract {
            params: vec![x],
            results: vec![res],
            pre,
            post,
        },
    );
    inc
}

/// Distance between `a` and `b` where the else branch adds instead of subtracting.
///
/// ```text
/// if a < b { d = b - a } else { d = a + b }
/// r = inc(d)
/// assert(d <= a || d <= b)
/// ```
fn distance(ctx: &mut Context) -> Fixture {
    let a = ctx.bv_symbol("a", 4);
    let b_in = ctx.bv_symbol("b", 4);
    let d1 = ctx.bv_symbol("d1", 4);
    let d2 = ctx.bv_symbol("d2", 4);
    let d = ctx.bv_symbol("d", 4);
    let r = ctx.bv_symbol("r", 4);
    let smaller = ctx.less(a, b_in);
    let b_minus_a = ctx.sub(b_in, a);
    let a_plus_b = ctx.add(a, b_in);
    let below_a = ctx.greater_or_equal(a, d);
    let below_b = ctx.greater_or_equal(b_in, d);
    let ok = ctx.or(below_a, below_b);

    let mut b = ProgramBuilder::new();
    let main = b.function("main", &[a, b_in]);
    let entry = b.block(main);
    let left = b.block(main);
    let right = b.block(main);
    let join = b.block(main);
    let inc = increment(ctx, &mut b);
    b.push(
        entry,
        Instruction::Branch(Terminator::Cond {
            cond: smaller,
            then: left,
            els: right,
        }),
    );
    b.push(left, Instruction::Assign { target: d1, value: b_minus_a });
    b.push(left, Instruction::Branch(Terminator::Goto(join)));
    b.push(right, Instruction::Assign { target: d2, value: a_plus_b });
    b.push(right, Instruction::Branch(Terminator::Goto(join)));
    b.push(
        join,
        Instruction::Phi {
            target: d,
            incoming: vec![(left, d1), (right, d2)],
        },
    );
    b.push(
        join,
        Instruction::Call {
            callee: inc,
            args: vec![d],
            results: vec![r],
        },
    );
    let check = b.push(join, Instruction::Assert { cond: ok });
    b.push(join, Instruction::Branch(Terminator::Return(vec![])));
    Fixture {
        program: b.build(ctx).unwrap(),
        main,
        a,
        b: b_in,
        memory: None,
        check,
    }
}

/// The distance computation followed by an array round trip and a loop that counts up to `d`.
///
/// ```text
/// m1 = m[k := a]
/// if a < b { d = b - a } else { d = a + b }
/// r = inc(d)
/// v = m1[k]
/// i = 0; while i < d { i = i + 1 }
/// assert(i <= v || i <= b)
/// ```
fn counting(ctx: &mut Context) -> Fixture {
    let a = ctx.bv_symbol("a", 4);
    let b_in = ctx.bv_symbol("b", 4);
    let k = ctx.bv_symbol("k", 2);
    let m = ctx.array_symbol("m", 2, 4);
    let m1 = ctx.array_symbol("m1", 2, 4);
    let d1 = ctx.bv_symbol("d1", 4);
    let d2 = ctx.bv_symbol("d2", 4);
    let d = ctx.bv_symbol("d", 4);
    let r = ctx.bv_symbol("r", 4);
    let v = ctx.bv_symbol("v", 4);
    let i = ctx.bv_symbol("i", 4);
    let i2 = ctx.bv_symbol("i2", 4);
    let zero = ctx.zero(4);
    let one = ctx.one(4);
    let smaller = ctx.less(a, b_in);
    let b_minus_a = ctx.sub(b_in, a);
    let a_plus_b = ctx.add(a, b_in);
    let inc_i = ctx.add(i, one);
    let more = ctx.less(i, d);
    let below_v = ctx.greater_or_equal(v, i);
    let below_b = ctx.greater_or_equal(b_in, i);
    let ok = ctx.or(below_v, below_b);

    let mut b = ProgramBuilder::new();
    let main = b.function("main", &[a, b_in, k, m]);
    let entry = b.block(main);
    let left = b.block(main);
    let right = b.block(main);
    let join = b.block(main);
    let header = b.block(main);
    let body = b.block(main);
    let exit = b.block(main);
    let inc = increment(ctx, &mut b);

    b.push(
        entry,
        Instruction::Store {
            target: m1,
            array: m,
            index: k,
            data: a,
        },
    );
    b.push(
        entry,
        Instruction::Branch(Terminator::Cond {
            cond: smaller,
            then: left,
            els: right,
        }),
    );
    b.push(left, Instruction::Assign { target: d1, value: b_minus_a });
    b.push(left, Instruction::Branch(Terminator::Goto(join)));
    b.push(right, Instruction::Assign { target: d2, value: a_plus_b });
    b.push(right, Instruction::Branch(Terminator::Goto(join)));
    b.push(
        join,
        Instruction::Phi {
            target: d,
            incoming: vec![(left, d1), (right, d2)],
        },
    );
    b.push(
        join,
        Instruction::Call {
            callee: inc,
            args: vec![d],
            results: vec![r],
        },
    );
    b.push(
        join,
        Instruction::Load {
            target: v,
            array: m1,
            index: k,
        },
    );
    b.push(join, Instruction::Branch(Terminator::Goto(header)));
    b.push(
        header,
        Instruction::Phi {
            target: i,
            incoming: vec![(join, zero), (body, i2)],
        },
    );
    b.push(
        header,
        Instruction::Branch(Terminator::Cond {
            cond: more,
            then: body,
            els: exit,
        }),
    );
    b.push(body, Instruction::Assign { target: i2, value: inc_i });
    b.push(body, Instruction::Branch(Terminator::Goto(header)));
    let check = b.push(exit, Instruction::Assert { cond: ok });
    b.push(exit, Instruction::Branch(Terminator::Return(vec![])));
    Fixture {
        program: b.build(ctx).unwrap(),
        main,
        a,
        b: b_in,
        memory: Some((k, m)),
        check,
    }
}

const POLICIES: [CallPolicy; 2] = [CallPolicy::Inline { max_depth: 2 }, CallPolicy::Summarize];

fn exec_options(bound: u32, calls: CallPolicy) -> ExecOptions {
    ExecOptions {
        bound,
        calls,
        ..ExecOptions::default()
    }
}

/// Every constraint holds on the values of a concrete run along the same path. The negated
/// assertion holds exactly when the run fails it.
#[test]
fn concrete_runs_satisfy_their_encoding() {
    let mut ctx = Context::default();
    let f = counting(&mut ctx);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0xc0ffee);
    let mut failures = 0;
    let mut runs = 0;
    for _ in 0..40 {
        let inputs = f.random_inputs(&mut rng);
        for calls in POLICIES {
            let opts = exec_options(16, calls);
            let trace = execute(&mut ctx, &f.program, f.main, &inputs, &opts).unwrap();
            assert!(trace.violated_assumption.is_none());
            let failed = trace.failed_assertion == Some(f.check);
            failures += failed as u32;
            runs += 1;

            let spec = PathSpec::new(f.main, trace.path.clone())
                .with_assertion(f.check)
                .with_bound(16)
                .with_calls(calls)
                .with_inputs(inputs.clone());
            let set = encode_path(&mut ctx, &f.program, &spec).unwrap();
            assert!(set.reached_assertion());
            let values = trace.values_map();
            for c in set.constraints() {
                let holds = eval_bool_expr(&ctx, &values, c.formula).unwrap();
                if c.kind == ConstraintKind::AssertNegation {
                    assert_eq!(holds, failed, "{inputs:?}");
                } else {
                    assert!(holds, "{} does not hold for {inputs:?}", c.id);
                }
            }
        }
    }
    // the seed produces both outcomes
    assert!(failures > 0 && failures < runs, "{failures} of {runs}");
}

/// Cost of making the assertion hold when only the first `soft_prefix` soft groups are kept.
fn min_cost(ctx: &mut Context, set: &ConstraintSet, soft_prefix: usize) -> u64 {
    let weighted = assign_weights(set, &WeightTable::default(), &AssignOptions::default());
    let obligation = set.obligation().unwrap();
    let mut hard: Vec<ExprRef> = weighted
        .hard()
        .filter(|c| c.id != obligation.id)
        .map(|c| set.get(c.id).formula)
        .collect();
    hard.push(ctx.not(obligation.formula));
    let soft: Vec<(ExprRef, u64)> = weighted
        .soft()
        .iter()
        .take(soft_prefix)
        .map(|g| (set.get(g.members[0]).formula, g.weight))
        .collect();
    let mut session = EnumerativeMaxSat::default().open().unwrap();
    match session
        .minimal_drop(ctx, &hard, &soft, &Budget::unlimited())
        .unwrap()
    {
        MaxSatOutcome::Optimum { cost, .. } => cost,
        other => panic!("unexpected outcome {other:?}"),
    }
}

/// Adding soft constraints never makes the optimum cheaper.
#[test]
fn cost_is_monotone_in_soft_constraints() {
    let mut ctx = Context::default();
    let f = distance(&mut ctx);
    let calls = CallPolicy::Inline { max_depth: 2 };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let mut checked = 0;
    for _ in 0..40 {
        let inputs = f.random_inputs(&mut rng);
        let opts = exec_options(8, calls);
        let trace = execute(&mut ctx, &f.program, f.main, &inputs, &opts).unwrap();
        if trace.failed_assertion.is_none() {
            continue;
        }
        let spec = PathSpec::new(f.main, trace.path.clone())
            .with_assertion(f.check)
            .with_calls(calls)
            .with_inputs(inputs);
        let set = encode_path(&mut ctx, &f.program, &spec).unwrap();
        let n = set.soft_eligible().count();
        let costs: Vec<u64> = (0..=n).map(|k| min_cost(&mut ctx, &set, k)).collect();
        assert_eq!(costs[0], 0);
        assert!(costs.windows(2).all(|w| w[0] <= w[1]), "{costs:?}");
        assert!(costs[n] > 0, "{costs:?}");
        checked += 1;
        if checked == 3 {
            break;
        }
    }
    assert!(checked > 0);
}

#[test]
fn localization_is_idempotent_and_deterministic() {
    let mut ctx = Context::default();
    let f = distance(&mut ctx);
    let calls = CallPolicy::Inline { max_depth: 2 };
    let opts = LocalizerOptions {
        calls,
        ..LocalizerOptions::default()
    };
    let loc = FaultLocalizer::new(EnumerativeMaxSat::default(), WeightTable::default())
        .with_options(opts);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let mut targets = vec![];
    for _ in 0..200 {
        let inputs = f.random_inputs(&mut rng);
        let trace = execute(&mut ctx, &f.program, f.main, &inputs, &exec_options(8, calls)).unwrap();
        if let Some(failed) = trace.failed_assertion {
            targets.push(Target::new(f.main, trace.path, failed).with_inputs(inputs));
        }
        if targets.len() == 3 {
            break;
        }
    }
    assert_eq!(targets.len(), 3);

    for target in targets.iter() {
        let first = loc.localize(&mut ctx, &f.program, target).unwrap();
        let second = loc.localize(&mut ctx.clone(), &f.program, target).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }
    let parallel: Vec<LocalizationResult> = loc
        .localize_paths(&ctx, &f.program, &targets)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let again: Vec<LocalizationResult> = loc
        .localize_paths(&ctx, &f.program, &targets)
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(parallel, again);
    for (target, result) in targets.iter().zip(parallel.iter()) {
        assert_eq!(&loc.localize(&mut ctx, &f.program, target).unwrap(), result);
    }

    // weights only depend on the constraint set and the table
    let spec = PathSpec::new(f.main, targets[0].path.clone())
        .with_assertion(targets[0].assertion)
        .with_calls(calls)
        .with_inputs(targets[0].inputs.clone());
    let set = encode_path(&mut ctx, &f.program, &spec).unwrap();
    let table = WeightTable::default();
    let weighted = assign_weights(&set, &table, &AssignOptions::default());
    assert_eq!(weighted, assign_weights(&set, &table, &AssignOptions::default()));
    assert_eq!(weighted, weighted.reassign(&table));
    let soft = weighted.soft();
    assert!(soft.windows(2).all(|w| {
        (w[0].weight, w[0].stmt, w[0].members[0]) < (w[1].weight, w[1].stmt, w[1].members[0])
    }));
}

#[test]
fn misordered_tables_are_rejected() {
    for (more_likely, neutral, found, less_likely) in
        [(10, 1, 20, 30), (1, 20, 10, 30), (1, 10, 30, 20), (5, 5, 5, 5)]
    {
        assert!(matches!(
            WeightTable::new(more_likely, neutral, found, less_likely),
            Err(ConfigError::Ordering { .. })
        ));
    }
    assert!(matches!(
        "more_likely=50".parse::<WeightTable>(),
        Err(ConfigError::Ordering { .. })
    ));
    assert!("less_likely=15".parse::<WeightTable>().is_err());
    assert_eq!(
        "more_likely=2,neutral=3,found=4,less_likely=5".parse::<WeightTable>(),
        WeightTable::new(2, 3, 4, 5)
    );
}
