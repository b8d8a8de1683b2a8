//! Prompt construction and fallbacks for problem generation and code review.

use metrics::counter;
use serde_json::{Map, Value, json};

use super::{TextGenerator, extract_json_object};

pub const PROBLEM_FIELDS: [&str; 7] = [
    "problem",
    "problem_statement",
    "sample_input",
    "sample_output",
    "testcase_explanation",
    "difficulty",
    "constraints",
];

/// What the review is about.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// The code failed to compile or run.
    Failed { error: &'a str },
    /// The code ran, or was submitted for review without running it.
    Passed { output: Option<&'a str> },
}

fn default_problem(topic: &str) -> Map<String, Value> {
    let description = format!("Write a program to solve problems related to {topic}");
    let mut problem = Map::new();
    problem.insert("problem".into(), description.clone().into());
    problem.insert("problem_statement".into(), description.into());
    problem.insert("sample_input".into(), "Sample input".into());
    problem.insert("sample_output".into(), "Sample output".into());
    problem.insert("testcase_explanation".into(), "Basic test case".into());
    problem.insert("difficulty".into(), "medium".into());
    problem.insert("constraints".into(), "No specific constraints".into());
    problem
}

fn problem_prompt(topic: &str) -> String {
    format!(
        r#"Generate a coding problem related to the topic: {topic}
Please provide the response in the following JSON format:
{{
    "problem": "Clear description of the problem",
    "problem_statement": "Clear description of the problem",
    "sample_input": "Example input",
    "sample_output": "Expected output for the sample input",
    "testcase_explanation": "Explanation of the test case",
    "difficulty": "easy/medium/hard",
    "constraints": "Any constraints or requirements"
}}
Make sure the problem is:
1. Clear and well-defined
2. Appropriate for the topic
3. Has a single correct solution
4. Includes proper constraints"#
    )
}

/// Asks the generator for a problem on `topic`. Missing fields are filled
/// from defaults; without a generator, or on failure, the defaults are
/// returned with an `error` field.
pub async fn generate_problem<G: TextGenerator>(generator: Option<&G>, topic: &str) -> Value {
    let mut fallback = default_problem(topic);

    let Some(generator) = generator else {
        counter!("ai_requests_total", "outcome" => "fallback").increment(1);
        fallback.insert("error".into(), "AI model not available".into());
        return Value::Object(fallback);
    };

    let parsed = match generator.generate(&problem_prompt(topic)).await {
        Ok(text) => extract_json_object(&text),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(mut problem) => {
            counter!("ai_requests_total", "outcome" => "ok").increment(1);
            for field in PROBLEM_FIELDS {
                if !problem.contains_key(field) {
                    if let Some(default) = fallback.remove(field) {
                        problem.insert(field.to_string(), default);
                    }
                }
            }
            Value::Object(problem)
        }
        Err(e) => {
            counter!("ai_requests_total", "outcome" => "error").increment(1);
            tracing::warn!(topic, "problem generation failed: {}", e);
            fallback.insert("error".into(), format!("Failed to generate problem: {e}").into());
            Value::Object(fallback)
        }
    }
}

fn problem_context(problem: Option<&Value>) -> String {
    let Some(problem) = problem else {
        return String::new();
    };
    let field = |name: &str| problem.get(name).and_then(Value::as_str).unwrap_or_default();
    format!(
        "\nYou are given the following coding problem:\n\n\
         Problem Statement:\n{}\n\n\
         Constraints:\n{}\n\n\
         Sample Input:\n{}\n\n\
         Sample Output:\n{}\n",
        field("problem_statement"),
        field("constraints"),
        field("sample_input"),
        field("sample_output"),
    )
}

fn review_prompt(code: &str, language: &str, subject: Subject<'_>, problem: Option<&Value>) -> String {
    let context = problem_context(problem);
    match subject {
        Subject::Failed { error } => format!(
            r#"{context}
The following {language} code has an error:

Code:
{code}

Error:
{error}

Please provide:
1. What caused the error (with respect to the problem statement if possible)
2. How to fix it
3. Best practices to avoid this error
4. If possible, provide a corrected version of the code

Format your response as JSON:
{{
    "error_analysis": "What went wrong",
    "solution": "How to fix it",
    "best_practices": "Tips to avoid this error",
    "suggested_code": "Corrected version if applicable"
}}"#
        ),
        Subject::Passed { output } => format!(
            r#"{context}
Here is the user's solution in {language}:

{code}

Output:
{output}

Please review the code for:
1. Correctness with respect to the problem statement and constraints.
2. Code quality, optimization, and best practices.

Format your response as JSON:
{{
  "correctness": "Does the code solve the problem correctly?",
  "quality_assessment": "Overall code quality",
  "optimization_suggestions": "Performance improvements",
  "readability_improvements": "Code clarity suggestions",
  "best_practices": "Programming best practices"
}}"#,
            output = output.unwrap_or("(not executed)")
        ),
    }
}

fn fallback_review(subject: Subject<'_>) -> Value {
    match subject {
        Subject::Failed { .. } => json!({
            "error_analysis": "Code execution failed",
            "solution": "Check your code syntax and logic",
            "best_practices": "Always test your code with simple examples first",
            "suggested_code": "Unable to provide specific suggestions without AI model"
        }),
        Subject::Passed { .. } => json!({
            "quality_assessment": "Code executed successfully",
            "optimization_suggestions": "Consider code efficiency and readability",
            "readability_improvements": "Add comments and use clear variable names",
            "best_practices": "Follow language-specific coding conventions"
        }),
    }
}

/// Reviews `code`, taking the problem it solves into account when given.
pub async fn review_code<G: TextGenerator>(
    generator: Option<&G>,
    code: &str,
    language: &str,
    subject: Subject<'_>,
    problem: Option<&Value>,
) -> Value {
    let Some(generator) = generator else {
        counter!("ai_requests_total", "outcome" => "fallback").increment(1);
        return fallback_review(subject);
    };

    let prompt = review_prompt(code, language, subject, problem);
    let parsed = match generator.generate(&prompt).await {
        Ok(text) => extract_json_object(&text),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(review) => {
            counter!("ai_requests_total", "outcome" => "ok").increment(1);
            Value::Object(review)
        }
        Err(e) => {
            counter!("ai_requests_total", "outcome" => "error").increment(1);
            tracing::warn!(language, "code review failed: {}", e);
            json!({
                "error": format!("Failed to get AI feedback: {e}"),
                "message": "Unable to analyze code at this time"
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::Scripted;
    use crate::ai::{AiError, GeminiClient};

    const NONE: Option<&Scripted> = None;

    #[tokio::test]
    async fn problem_without_generator_uses_defaults() {
        let problem = generate_problem(NONE, "graphs").await;
        for field in PROBLEM_FIELDS {
            assert!(problem.get(field).is_some(), "missing {field}");
        }
        assert!(problem["problem"].as_str().unwrap().contains("graphs"));
        assert_eq!(problem["error"], "AI model not available");
    }

    #[tokio::test]
    async fn generated_problem_is_completed_with_defaults() {
        let generator = Scripted::new([Ok(
            "```json\n{\"problem\": \"Two Sum\", \"difficulty\": \"easy\"}\n```".to_string(),
        )]);
        let problem = generate_problem(Some(&generator), "arrays").await;

        assert_eq!(problem["problem"], "Two Sum");
        assert_eq!(problem["difficulty"], "easy");
        assert_eq!(problem["constraints"], "No specific constraints");
        assert!(problem.get("error").is_none());
        assert!(generator.last_prompt().contains("topic: arrays"));
    }

    #[tokio::test]
    async fn unparseable_problem_reports_an_error() {
        let generator = Scripted::new([Ok("I cannot help with that".to_string())]);
        let problem = generate_problem(Some(&generator), "dp").await;

        assert_eq!(problem["difficulty"], "medium");
        assert!(problem["error"].as_str().unwrap().starts_with("Failed to generate problem"));
    }

    #[tokio::test]
    async fn failed_generation_reports_an_error() {
        let generator = Scripted::new([Err(AiError::EmptyResponse)]);
        let problem = generate_problem(Some(&generator), "dp").await;
        assert!(problem["error"].as_str().unwrap().contains("no text"));
    }

    #[tokio::test]
    async fn fallback_review_depends_on_outcome() {
        let failed = review_code(NONE, "x", "python", Subject::Failed { error: "boom" }, None).await;
        assert_eq!(failed["error_analysis"], "Code execution failed");

        let passed = review_code(NONE, "x", "python", Subject::Passed { output: Some("1") }, None).await;
        assert_eq!(passed["quality_assessment"], "Code executed successfully");
    }

    #[tokio::test]
    async fn review_prompt_carries_error_and_problem() {
        let generator = Scripted::new([Ok(r#"{"error_analysis": "typo", "solution": "fix it"}"#.to_string())]);
        let problem = json!({
            "problem_statement": "Add two numbers",
            "constraints": "0 <= a, b <= 10",
            "sample_input": "1 2",
            "sample_output": "3"
        });
        let review = review_code(
            Some(&generator),
            "print(a+b",
            "python",
            Subject::Failed { error: "SyntaxError" },
            Some(&problem),
        )
        .await;

        assert_eq!(review["error_analysis"], "typo");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("The following python code has an error"));
        assert!(prompt.contains("SyntaxError"));
        assert!(prompt.contains("Add two numbers"));
        assert!(prompt.contains("0 <= a, b <= 10"));
    }

    #[tokio::test]
    async fn review_of_passing_code_asks_for_quality() {
        let generator = Scripted::new([Ok(r#"{"correctness": "yes"}"#.to_string())]);
        let review = review_code(
            Some(&generator),
            "print(3)",
            "python",
            Subject::Passed { output: Some("3\n") },
            None,
        )
        .await;

        assert_eq!(review["correctness"], "yes");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("Here is the user's solution in python"));
        assert!(prompt.contains("\"optimization_suggestions\""));
        assert!(!prompt.contains("Problem Statement"));
    }

    #[tokio::test]
    async fn unreachable_model_does_not_leak_the_key() {
        let client = GeminiClient::new("SECRET-KEY-123".into(), "m".into(), "http://127.0.0.1:9".into());

        let review = review_code(Some(&client), "x", "python", Subject::Passed { output: None }, None).await;
        assert!(review["error"].as_str().unwrap().starts_with("Failed to get AI feedback"));
        assert!(!review.to_string().contains("SECRET-KEY-123"));

        let problem = generate_problem(Some(&client), "graphs").await;
        assert!(problem["error"].as_str().unwrap().starts_with("Failed to generate problem"));
        assert!(!problem.to_string().contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn unparseable_review_is_reported() {
        let generator = Scripted::new([Ok("Looks fine to me".to_string())]);
        let review = review_code(
            Some(&generator),
            "x",
            "cpp",
            Subject::Passed { output: None },
            None,
        )
        .await;

        assert_eq!(review["message"], "Unable to analyze code at this time");
        assert!(review["error"].as_str().unwrap().starts_with("Failed to get AI feedback"));
    }
}
