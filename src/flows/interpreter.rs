//! Step interpreter
//!
//! Turns a step into outbound fragments and, for question steps, declares
//! what the next inbound reply must look like.

use super::graph::FlowGraph;
use super::model::{FlowStep, InputCapture, StepKind, ValidationRule};
use super::template::render;
use crate::messages::Fragment;
use crate::values::{VariableValue, Variables};
use regex::Regex;
use thiserror::Error;

/// What the next inbound reply is captured into.
#[derive(Debug, Clone, PartialEq)]
pub struct InputExpectation {
    pub variable: String,
    pub validation: ValidationRule,
}

/// A rendered step.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStep {
    pub step_id: String,
    pub fragments: Vec<Fragment>,
    pub expects: Option<InputExpectation>,
}

/// Render a step's content.
///
/// Fragments that render blank are dropped.
pub fn render_step(step: &FlowStep, variables: &Variables, context: &Variables) -> RenderedStep {
    let fragments = step
        .messages
        .iter()
        .filter_map(|message| {
            let rendered = render(&message.content, variables, context);
            if rendered.text.trim().is_empty() {
                None
            } else {
                Some(Fragment::new(rendered.text, message.kind))
            }
        })
        .collect();

    let expects = match (step.kind, &step.input) {
        (StepKind::Question, Some(capture)) => Some(InputExpectation {
            variable: capture.variable.clone(),
            validation: capture.validation.clone(),
        }),
        _ => None,
    };

    RenderedStep {
        step_id: step.id.clone(),
        fragments,
        expects,
    }
}

/// Render a question step again after a rejected or unresolved reply.
///
/// The step's retry message, if any, goes first.
pub fn render_retry(step: &FlowStep, variables: &Variables, context: &Variables) -> RenderedStep {
    let mut rendered = render_step(step, variables, context);
    let retry = step
        .input
        .as_ref()
        .and_then(|capture| capture.retry_message.as_deref())
        .map(|message| render(message, variables, context).text)
        .filter(|text| !text.trim().is_empty());

    if let Some(text) = retry {
        rendered.fragments.insert(0, Fragment::text(text));
    }
    rendered
}

/// Why a reply was not accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputRejection {
    #[error("reply is empty")]
    Empty,

    #[error("reply shorter than {min} characters")]
    TooShort { min: usize },

    #[error("reply longer than {max} characters")]
    TooLong { max: usize },

    #[error("reply is not a number")]
    NotANumber,

    #[error("{value} is outside the accepted range")]
    OutOfRange { value: f64 },

    #[error("reply is not an email address")]
    InvalidEmail,

    #[error("reply does not match the expected format")]
    PatternMismatch,

    #[error("reply is not one of the offered options")]
    NotAnOption,
}

/// Validate a raw reply for a step's input capture.
///
/// On success returns the value to store: numbers for `number` rules, the
/// option as written for `options`, trimmed text otherwise.
pub fn validate_input(
    capture: &InputCapture,
    pattern: Option<&Regex>,
    raw: &str,
) -> Result<VariableValue, InputRejection> {
    let reply = raw.trim();
    if reply.is_empty() {
        return Err(InputRejection::Empty);
    }

    match &capture.validation {
        ValidationRule::Any => Ok(reply.into()),
        ValidationRule::Text {
            min_length,
            max_length,
        } => {
            let len = reply.chars().count();
            if let Some(min) = *min_length {
                if len < min {
                    return Err(InputRejection::TooShort { min });
                }
            }
            if let Some(max) = *max_length {
                if len > max {
                    return Err(InputRejection::TooLong { max });
                }
            }
            Ok(reply.into())
        }
        ValidationRule::Number { min, max } => {
            let value = VariableValue::from(normalize_decimal(reply))
                .as_number()
                .ok_or(InputRejection::NotANumber)?;
            if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
                return Err(InputRejection::OutOfRange { value });
            }
            Ok(value.into())
        }
        ValidationRule::Email => {
            if looks_like_email(reply) {
                Ok(reply.into())
            } else {
                Err(InputRejection::InvalidEmail)
            }
        }
        ValidationRule::Pattern { .. } => match pattern {
            Some(regex) if !regex.is_match(reply) => Err(InputRejection::PatternMismatch),
            _ => Ok(reply.into()),
        },
        ValidationRule::Options { options } => options
            .iter()
            .find(|option| option.trim().to_lowercase() == reply.to_lowercase())
            .map(|option| VariableValue::from(option.trim()))
            .ok_or(InputRejection::NotAnOption),
    }
}

/// Validate a reply against the capture declared by `step` in `graph`.
pub fn validate_step_input(
    graph: &FlowGraph,
    step: &FlowStep,
    raw: &str,
) -> Option<Result<VariableValue, InputRejection>> {
    let capture = step.input.as_ref()?;
    Some(validate_input(capture, graph.input_pattern(&step.id), raw))
}

/// Rewrite a localized number into `parse::<f64>` form.
///
/// With both `,` and `.` present, the last one is the decimal separator and
/// the other groups thousands. A lone `,` is a decimal separator unless
/// exactly three digits follow it; repeated separators of one kind group
/// thousands.
fn normalize_decimal(raw: &str) -> String {
    let raw = raw.trim();
    let commas = raw.matches(',').count();
    let dots = raw.matches('.').count();

    match (commas, dots) {
        (0, 0) => raw.to_string(),
        (0, 1) => raw.to_string(),
        (0, _) => raw.replace('.', ""),
        (1, 0) => {
            let decimals = raw.rsplit(',').next().map_or(0, str::len);
            if decimals == 3 {
                raw.replace(',', "")
            } else {
                raw.replace(',', ".")
            }
        }
        (_, 0) => raw.replace(',', ""),
        _ => {
            let last_comma = raw.rfind(',');
            let last_dot = raw.rfind('.');
            if last_comma > last_dot {
                raw.replace('.', "").replace(',', ".")
            } else {
                raw.replace(',', "")
            }
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::model::StepMessage;
    use crate::messages::ContentKind;

    fn capture(rule: ValidationRule) -> InputCapture {
        InputCapture::new("answer", rule)
    }

    #[test]
    fn test_render_question_declares_expectation() {
        let step = FlowStep::question(
            "ask_name",
            "Hi {first}, what's your surname?",
            capture(ValidationRule::Any),
        );
        let vars: Variables = [("first", "Ana")].into_iter().collect();
        let rendered = render_step(&step, &vars, &Variables::new());
        assert_eq!(rendered.fragments, vec![Fragment::text("Hi Ana, what's your surname?")]);
        assert_eq!(rendered.expects.unwrap().variable, "answer");
    }

    #[test]
    fn test_render_skips_blank_fragments() {
        let mut step = FlowStep::message("info", "{missing}");
        step.messages.push(StepMessage {
            content: "https://example.com/menu.pdf".into(),
            kind: ContentKind::Media,
        });
        let rendered = render_step(&step, &Variables::new(), &Variables::new());
        assert_eq!(rendered.fragments.len(), 1);
        assert_eq!(rendered.fragments[0].kind, ContentKind::Media);
        assert!(rendered.expects.is_none());
    }

    #[test]
    fn test_render_retry_prepends_retry_message() {
        let step = FlowStep::question(
            "ask_age",
            "How old are you?",
            capture(ValidationRule::Number { min: None, max: None })
                .with_retry_message("Please answer with a number."),
        );
        let rendered = render_retry(&step, &Variables::new(), &Variables::new());
        let texts: Vec<_> = rendered.fragments.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(texts, vec!["Please answer with a number.", "How old are you?"]);
    }

    #[test]
    fn test_number_validation_stores_number() {
        let rule = capture(ValidationRule::Number {
            min: Some(0.0),
            max: Some(120.0),
        });
        assert_eq!(validate_input(&rule, None, " 20 "), Ok(VariableValue::Number(20.0)));
        assert_eq!(validate_input(&rule, None, "2,5"), Ok(VariableValue::Number(2.5)));
        assert_eq!(validate_input(&rule, None, "diez"), Err(InputRejection::NotANumber));
        assert!(matches!(
            validate_input(&rule, None, "300"),
            Err(InputRejection::OutOfRange { .. })
        ));
        assert_eq!(validate_input(&rule, None, "   "), Err(InputRejection::Empty));
    }

    #[test]
    fn test_number_validation_reads_grouping_separators() {
        let rule = capture(ValidationRule::Number {
            min: None,
            max: None,
        });
        let number = |raw: &str| validate_input(&rule, None, raw);
        assert_eq!(number("1,000"), Ok(VariableValue::Number(1000.0)));
        assert_eq!(number("1.000,5"), Ok(VariableValue::Number(1000.5)));
        assert_eq!(number("1,000.5"), Ok(VariableValue::Number(1000.5)));
        assert_eq!(number("1.000.000"), Ok(VariableValue::Number(1_000_000.0)));
        assert_eq!(number("0,25"), Ok(VariableValue::Number(0.25)));
        assert_eq!(number("3.5"), Ok(VariableValue::Number(3.5)));
    }

    #[test]
    fn test_text_length_counts_chars() {
        let rule = capture(ValidationRule::Text {
            min_length: Some(2),
            max_length: Some(4),
        });
        assert!(validate_input(&rule, None, "ñañá").is_ok());
        assert_eq!(
            validate_input(&rule, None, "a"),
            Err(InputRejection::TooShort { min: 2 })
        );
        assert_eq!(
            validate_input(&rule, None, "abcde"),
            Err(InputRejection::TooLong { max: 4 })
        );
    }

    #[test]
    fn test_email_validation() {
        let rule = capture(ValidationRule::Email);
        assert!(validate_input(&rule, None, "ana@example.com").is_ok());
        assert!(validate_input(&rule, None, "ana@example").is_err());
        assert!(validate_input(&rule, None, "ana example@x.com").is_err());
        assert!(validate_input(&rule, None, "@example.com").is_err());
    }

    #[test]
    fn test_options_return_canonical_option() {
        let rule = capture(ValidationRule::Options {
            options: vec!["Sí".into(), "No".into()],
        });
        assert_eq!(validate_input(&rule, None, "sí"), Ok(VariableValue::from("Sí")));
        assert_eq!(validate_input(&rule, None, "NO"), Ok(VariableValue::from("No")));
        assert_eq!(validate_input(&rule, None, "maybe"), Err(InputRejection::NotAnOption));
    }

    #[test]
    fn test_pattern_validation() {
        let rule = capture(ValidationRule::Pattern {
            pattern: r"^\d{5}$".into(),
        });
        let regex = Regex::new(r"^\d{5}$").unwrap();
        assert!(validate_input(&rule, Some(&regex), "28001").is_ok());
        assert_eq!(
            validate_input(&rule, Some(&regex), "2800"),
            Err(InputRejection::PatternMismatch)
        );
    }
}
