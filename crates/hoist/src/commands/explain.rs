//! Explain command - explain diagnostic codes

use anyhow::{anyhow, Result};
use clap::Args;
use hoist_diagnostics::DiagnosticCode;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// Diagnostic code to explain (e.g., H001, E001)
    pub code: String,
}

struct CodeExplanation {
    code: &'static str,
    title: &'static str,
    description: &'static str,
    example: Option<&'static str>,
    suggestion: Option<&'static str>,
    related: &'static [&'static str],
}

const EXPLANATIONS: &[CodeExplanation] = &[
    // Allocation hints
    CodeExplanation {
        code: "H001",
        title: "Environment Allocated",
        description: r#"Entering this scope allocates a heap environment (display class) holding
the variables captured by lambdas declared in or below it.

Scopes inside loops allocate a fresh environment on every iteration."#,
        example: Some(r#"int x = 0;
Func<int> f = () => x;  // x moves into <>c__DisplayClass0_0"#),
        suggestion: Some("Capture fewer variables, or move the capturing lambda out of hot loops."),
        related: &["H002"],
    },
    CodeExplanation {
        code: "H002",
        title: "Function Value Cached",
        description: "A function value is stored in a cache field or local and reused instead of being allocated on every evaluation.",
        example: Some(r#"while (cond) {
    Use(() => x);  // allocated once per environment, not per iteration
}"#),
        suggestion: None,
        related: &["H001"],
    },
    // Edit-and-continue
    CodeExplanation {
        code: "E001",
        title: "Rude Edit",
        description: r#"The edit changes the shape of a synthesized environment or lambda so that
the identity from the previous generation cannot be reused.

A new identity is allocated and lowering continues, but the running program
cannot pick up the change without a restart."#,
        example: Some(r#"// generation 0
int x = 0; int F() => x;
// generation 1: F now also captures y
int x = 0, y = 0; int F() => x + y;"#),
        suggestion: Some("Restart the debugging session to apply the edit."),
        related: &[],
    },
    // Internal errors
    CodeExplanation {
        code: "I001",
        title: "Internal Error",
        description: "Closure conversion reached a state that well-formed input never produces, such as a nested function left in a lowered body or a constructor that captures `this` without calling its initializer.",
        example: None,
        suggestion: Some("Run with -vv and report the method together with the log output."),
        related: &["I002", "I007"],
    },
    CodeExplanation {
        code: "I002",
        title: "Unreachable Environment",
        description: "A nested function references an environment that is not reachable from the environment it is lowered onto.",
        example: None,
        suggestion: None,
        related: &["I001", "I007"],
    },
    CodeExplanation {
        code: "I003",
        title: "Conflicting Environment Parent",
        description: "An environment would need to be chained to two different enclosing environments.",
        example: None,
        suggestion: None,
        related: &["I004"],
    },
    CodeExplanation {
        code: "I004",
        title: "Environment Merge Mismatch",
        description: "Two environments selected for merging disagree on their parent or on the functions capturing them.",
        example: None,
        suggestion: Some("Lower the method without --release to skip environment merging."),
        related: &["I003"],
    },
    CodeExplanation {
        code: "I005",
        title: "Undeclared Variable",
        description: "A local is referenced that no enclosing scope declares.",
        example: None,
        suggestion: Some("Check that every block, catch clause and sequence lists the locals it declares."),
        related: &["I006"],
    },
    CodeExplanation {
        code: "I006",
        title: "Unknown Nested Function",
        description: "A call or function value refers to a local function that is not declared in the method.",
        example: None,
        suggestion: None,
        related: &["I005"],
    },
    CodeExplanation {
        code: "I007",
        title: "Unreachable Frame",
        description: "No frame pointer holds an instance of an environment type that the rewritten code needs.",
        example: None,
        suggestion: None,
        related: &["I001", "I002"],
    },
];

fn print_section(label: &str, text: &str, use_color: bool) {
    if use_color {
        println!("{}:", console::style(label).bold());
    } else {
        println!("{}:", label);
    }
    for line in text.lines() {
        println!("  {}", line);
    }
    println!();
}

fn print_text(explanation: &CodeExplanation, use_color: bool) {
    let underline = "=".repeat(explanation.code.len() + explanation.title.len() + 2);
    if use_color {
        println!(
            "\n{}: {}\n{}",
            console::style(explanation.code).bold().cyan(),
            console::style(explanation.title).bold(),
            underline
        );
    } else {
        println!("\n{}: {}\n{}", explanation.code, explanation.title, underline);
    }
    println!("\n{}\n", explanation.description);

    if let Some(example) = explanation.example {
        print_section("Example", example, use_color);
    }
    if let Some(suggestion) = explanation.suggestion {
        print_section("Suggestion", suggestion, use_color);
    }
    if !explanation.related.is_empty() {
        let related = explanation.related.join(", ");
        if use_color {
            println!("{}: {}", console::style("Related").dim(), related);
        } else {
            println!("Related: {}", related);
        }
    }
}

pub fn run(args: ExplainArgs, format: OutputFormat, use_color: bool) -> Result<()> {
    let code = DiagnosticCode::parse(&args.code)
        .ok_or_else(|| anyhow!("Unknown diagnostic code: {}", args.code))?;
    let explanation = EXPLANATIONS
        .iter()
        .find(|e| e.code == code.as_str())
        .ok_or_else(|| anyhow!("No explanation available for {}", code))?;

    match format {
        OutputFormat::Text => print_text(explanation, use_color),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "code": explanation.code,
                "title": explanation.title,
                "severity": code.default_severity().as_str(),
                "description": explanation.description,
                "example": explanation.example,
                "suggestion": explanation.suggestion,
                "related": explanation.related,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_explanation_names_a_real_code() {
        for explanation in EXPLANATIONS {
            assert!(
                DiagnosticCode::parse(explanation.code).is_some(),
                "{} is not a diagnostic code",
                explanation.code
            );
            for related in explanation.related {
                assert!(
                    EXPLANATIONS.iter().any(|e| e.code == *related),
                    "{} refers to unexplained {}",
                    explanation.code,
                    related
                );
            }
        }
    }

    #[test]
    fn test_unknown_code_is_an_error() {
        let args = ExplainArgs {
            code: "Z999".to_string(),
        };
        assert!(run(args, OutputFormat::Json, false).is_err());
    }
}
