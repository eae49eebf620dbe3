use fcoord::output::{format_human, HumanOutput};

#[test]
fn format_human_includes_sections() {
    let mut human = HumanOutput::new("fcoord lock: /repo/plan.md (write)");
    human.push_summary("agent", "alice");
    human.push_detail("tracked /repo/plan.md");
    human.push_warning("bob holds a read lock on /repo");
    human.push_next_step("fcoord release /repo/plan.md");

    let rendered = format_human(&human);
    assert!(rendered.contains("fcoord lock: /repo/plan.md (write)"));
    assert!(rendered.contains("Summary:"));
    assert!(rendered.contains("- agent: alice"));
    assert!(rendered.contains("Details:"));
    assert!(rendered.contains("- tracked /repo/plan.md"));
    assert!(rendered.contains("Warnings:"));
    assert!(rendered.contains("- bob holds a read lock on /repo"));
    assert!(rendered.contains("Next steps:"));
    assert!(rendered.contains("- fcoord release /repo/plan.md"));
}

#[test]
fn format_human_omits_empty_sections() {
    let human = HumanOutput::new("fcoord stats");
    assert_eq!(format_human(&human), "fcoord stats");
}

#[test]
fn empty_summary_values_render_as_bare_keys() {
    let mut human = HumanOutput::new("fcoord agent ls");
    human.push_summary("no agents registered", "");
    assert_eq!(
        format_human(&human),
        "fcoord agent ls\n\nSummary:\n- no agents registered"
    );
}
