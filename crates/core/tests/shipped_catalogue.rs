use std::path::PathBuf;

use chrono::Utc;
use docwright_core::domain::session::{Turn, TurnRole};
use docwright_core::extraction::extract;
use docwright_core::schemas::{SchemaSource, YamlSchemaDirectory};

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn shipped() -> YamlSchemaDirectory {
    let root = repo_root();
    YamlSchemaDirectory::load(root.join("config/doc_types"), root.join("templates"))
        .expect("shipped catalogue should load")
}

#[test]
fn shipped_catalogue_loads_with_templates() {
    let schemas = shipped();
    let nda = schemas.get("nda").expect("nda is shipped");

    assert_eq!(nda.display_name, "Mutual Non-Disclosure Agreement");
    assert!(nda.template_text.contains("{{party_a}}"));
    assert_eq!(nda.required_fields().count(), 5);
    assert!(nda.system_prompt.as_deref().is_some_and(|prompt| prompt.contains("{fields}")));
}

fn turn(index: usize, role: TurnRole, text: &str) -> Turn {
    Turn { role, text: text.to_string(), index, timestamp: Utc::now() }
}

#[test]
fn shipped_nda_extracts_a_single_detailed_message() {
    let schemas = shipped();
    let nda = schemas.get("nda").expect("nda is shipped");
    let turns = vec![
        Turn {
            role: TurnRole::System,
            text: "What is the name of Party A?".to_string(),
            index: 0,
            timestamp: Utc::now(),
        },
        Turn {
            role: TurnRole::User,
            text: "Party A is Acme Corp, Party B is Beta Ltd, the purpose is evaluating a joint \
                   venture, and the term is 5 years."
                .to_string(),
            index: 1,
            timestamp: Utc::now(),
        },
    ];

    let result = extract(&nda, &turns).expect("extraction");
    assert_eq!(result.values["party_a"].value.canonical(), "Acme Corp");
    assert_eq!(result.values["party_b"].value.canonical(), "Beta Ltd");
    assert_eq!(result.values["purpose"].value.canonical(), "evaluating a joint venture");
    assert_eq!(result.values["term_years"].value.canonical(), "5");
    assert_eq!(result.outstanding_required(&nda), vec!["effective_date".to_string()]);
}

#[test]
fn shipped_nda_separates_and_joined_statements() {
    let schemas = shipped();
    let nda = schemas.get("nda").expect("nda is shipped");
    let turns = vec![turn(
        0,
        TurnRole::User,
        "Party A is Acme Corp and Party B is Beta Ltd. The purpose is evaluating a joint venture \
         and the term is 5 years",
    )];

    let result = extract(&nda, &turns).expect("extraction");
    assert_eq!(result.values["party_a"].raw, "Acme Corp");
    assert_eq!(result.values["party_b"].raw, "Beta Ltd");
    assert_eq!(result.values["purpose"].raw, "evaluating a joint venture");
    assert_eq!(result.values["term_years"].value.canonical(), "5");
}

#[test]
fn shipped_nda_ignores_unrelated_year_counts() {
    let schemas = shipped();
    let nda = schemas.get("nda").expect("nda is shipped");
    let turns = vec![
        turn(0, TurnRole::User, "The term is 5 years."),
        turn(1, TurnRole::System, "Noted. Anything else?"),
        turn(2, TurnRole::User, "We have traded with Beta for 20 years."),
        turn(3, TurnRole::System, "Thanks."),
        turn(4, TurnRole::User, "Actually, make it 3 years."),
    ];

    let early = extract(&nda, &turns[..3]).expect("extraction");
    assert_eq!(early.values["term_years"].value.canonical(), "5");
    assert_eq!(early.values["term_years"].source_turn_index, 0);
    assert!(early.resolved_contradictions.is_empty());

    let revised = extract(&nda, &turns).expect("extraction");
    assert_eq!(revised.values["term_years"].value.canonical(), "3");
    assert_eq!(revised.resolved_contradictions[0].superseded[0].turn_index, 0);
}
