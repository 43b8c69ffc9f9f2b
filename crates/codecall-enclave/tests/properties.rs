//! Property tests: the front end never panics, sanitizing is idempotent and
//! integer arithmetic agrees with Rust.

use std::sync::Arc;

use codecall_enclave::parser::parse;
use codecall_enclave::sanitize::sanitize_json;
use codecall_enclave::validator::validate_code;
use codecall_enclave::{Enclave, EnclaveConfig, ExecutionResult, FnToolHandler, RunOptions};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        "[a-zA-Z0-9 _:-]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("k[a-z]{0,5}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn enclave() -> Enclave {
    Enclave::new(
        EnclaveConfig::default(),
        Arc::new(FnToolHandler::new(|_name, args| Ok(args))),
    )
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn parser_never_panics(source in "\\PC{0,200}") {
        let _ = parse(&source);
    }

    #[test]
    fn parser_never_panics_on_script_like_input(
        tokens in prop::collection::vec(
            prop_oneof![
                Just("const"), Just("let"), Just("x"), Just("="), Just("=>"), Just("("),
                Just(")"), Just("{"), Just("}"), Just("["), Just("]"), Just(";"), Just(","),
                Just("await"), Just("callTool"), Just("'a'"), Just("`t${"), Just("1"),
                Just("."), Just("?."), Just("..."), Just("for"), Just("of"), Just("if"),
                Just("return"), Just("+"), Just("**"), Just("??"), Just(":"), Just("?"),
            ],
            0..60,
        )
    ) {
        let source = tokens.join(" ");
        if validate_code(&source, None).is_ok() {
            let _ = parse(&source);
        }
    }

    #[test]
    fn sanitize_is_idempotent(value in arb_json()) {
        let once = sanitize_json(value, 64);
        let twice = sanitize_json(once.clone(), 64);
        prop_assert_eq!(serde_json::to_string(&once).unwrap(), serde_json::to_string(&twice).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn integer_arithmetic_matches(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let code = format!("return ({a}) + ({b}) * 2 - ({a} % 7);");
        let result = block_on(enclave().run(&code, RunOptions::default()));
        prop_assert_eq!(result, ExecutionResult::ok(json!(a + b * 2 - (a % 7)), Vec::new()));
    }

    #[test]
    fn tool_round_trip_preserves_json(value in arb_json()) {
        let expected = sanitize_json(value.clone(), 64);
        let code = format!("return await callTool('echo', {{ v: {} }});", value);
        let result = block_on(enclave().run(&code, RunOptions::default()));
        prop_assert_eq!(result, ExecutionResult::ok(json!({ "v": expected }), Vec::new()));
    }
}
