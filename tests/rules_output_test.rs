//! End-to-end rule rendering: formats, titles, compare, dedupe, append.

use std::collections::BTreeSet;

use blockscan::rules::{
    render_rules, write_rules, FormattedRule, OutputFormat, OutputOptions, RuleSink, RuleStore,
    UrlResult,
};

fn rule(domain: &str, types: &[&str]) -> FormattedRule {
    FormattedRule {
        domain: domain.to_string(),
        resource_types: types.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
    }
}

fn result(url: &str, rules: Vec<FormattedRule>) -> UrlResult {
    UrlResult {
        url: url.to_string(),
        final_url: url.to_string(),
        success: true,
        needs_immediate_restart: false,
        has_matches: !rules.is_empty(),
        rules,
        redirect_domains: Vec::new(),
        error: None,
    }
}

#[test]
fn adblock_rules_mode_attaches_type_union() {
    let mut store = RuleStore::new();
    store.push(result(
        "https://host.test/",
        vec![rule("ads.other", &["script", "xhr"]), rule("cdn.track", &[])],
    ));

    let opts = OutputOptions {
        format: OutputFormat::AdblockRules,
        ..OutputOptions::default()
    };
    let lines = render_rules(&store, &opts).expect("render");
    assert_eq!(lines, vec!["||ads.other^$script,xhr", "||cdn.track^"]);
}

#[test]
fn output_preserves_input_task_order() {
    let mut store = RuleStore::new();
    store.push(result("https://b.test/", vec![rule("zeta.test", &[])]));
    store.push(result("https://a.test/", vec![rule("alpha.test", &[])]));

    let opts = OutputOptions {
        show_titles: true,
        ..OutputOptions::default()
    };
    let lines = render_rules(&store, &opts).expect("render");
    assert_eq!(
        lines,
        vec![
            "! https://b.test/",
            "||zeta.test^",
            "! https://a.test/",
            "||alpha.test^"
        ]
    );
}

#[test]
fn compare_against_baseline_emits_only_new_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    let baseline = dir.path().join("baseline.txt");
    // baseline in a different syntax still suppresses: normalization
    // strips the hosts prefix
    std::fs::write(&baseline, "127.0.0.1 ads.other\n! comment\n").expect("baseline");

    let mut store = RuleStore::new();
    store.push(result(
        "https://host.test/",
        vec![rule("ads.other", &[]), rule("new.test", &[])],
    ));

    let opts = OutputOptions {
        compare_file: Some(baseline),
        ..OutputOptions::default()
    };
    let lines = render_rules(&store, &opts).expect("render");
    assert_eq!(lines, vec!["||new.test^"]);
}

#[test]
fn second_compare_run_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("rules.txt");

    let mut store = RuleStore::new();
    store.push(result(
        "https://host.test/",
        vec![rule("ads.other", &[]), rule("new.test", &[])],
    ));

    let opts = OutputOptions::default();
    let written =
        write_rules(&store, &opts, &RuleSink::File(out.clone())).expect("first write");
    assert_eq!(written, 2);

    let opts = OutputOptions {
        compare_file: Some(out),
        ..OutputOptions::default()
    };
    let lines = render_rules(&store, &opts).expect("render");
    assert!(lines.is_empty(), "expected no new lines, got {lines:?}");
}

#[test]
fn dedupe_across_tasks_keeps_first() {
    let mut store = RuleStore::new();
    store.push(result("https://a.test/", vec![rule("ads.other", &[])]));
    store.push(result(
        "https://b.test/",
        vec![rule("ads.other", &[]), rule("fresh.test", &[])],
    ));

    let opts = OutputOptions {
        remove_dupes: true,
        ..OutputOptions::default()
    };
    let lines = render_rules(&store, &opts).expect("render");
    assert_eq!(lines, vec!["||ads.other^", "||fresh.test^"]);
}

#[test]
fn every_format_emits_one_line_per_domain() {
    let mut store = RuleStore::new();
    store.push(result("https://host.test/", vec![rule("ads.other", &["script"])]));

    for format in [
        OutputFormat::Adblock,
        OutputFormat::HostsLocal { ip: "0.0.0.0".into() },
        OutputFormat::Plain,
        OutputFormat::Dnsmasq,
        OutputFormat::DnsmasqOld,
        OutputFormat::Unbound,
        OutputFormat::Privoxy,
        OutputFormat::Pihole,
    ] {
        let opts = OutputOptions {
            format: format.clone(),
            ..OutputOptions::default()
        };
        let lines = render_rules(&store, &opts).expect("render");
        assert_eq!(lines.len(), 1, "{format} emitted {lines:?}");
        assert!(format.line_is_valid(&lines[0]), "{format} line {:?}", lines[0]);
    }
}
