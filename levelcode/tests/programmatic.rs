//! Programmatic step scenarios: tool directives, STEP / STEP_ALL handoff,
//! GENERATE_N, STEP_TEXT, source programs, and generator lifetime.

mod common;

use std::sync::Arc;

use common::*;
use levelcode::client::mock::{FileMapClientTools, MockResponse};
use levelcode::generator::StepHandle;
use levelcode::prelude::*;
use levelcode::stream::{LlmChunk, embed_tool_call};
use serde_json::json;

fn reader_delegate() -> Arc<dyn ClientToolDelegate> {
    Arc::new(FileMapClientTools::new([(
        "a.txt".to_owned(),
        "alpha contents".to_owned(),
    )]))
}

fn template_with_steps(id: &str, program: StepProgram) -> AgentTemplate {
    AgentTemplate::builder(id, "mock-model")
        .system_prompt("sys")
        .tools(["read_files", "set_output", "end_turn"])
        .handle_steps(program)
        .build()
        .expect("template builds")
}

#[tokio::test]
async fn tool_then_step_then_llm_end_turn() {
    let program = StepProgram::native(|mut handle: StepHandle| async move {
        let result = handle
            .invoke_tool("read_files", json!({ "paths": ["a.txt"] }))
            .await?;
        assert!(!result.is_empty());
        let complete = handle.step().await?;
        assert!(complete);
        Ok(())
    });

    let bed = bed_with(
        vec![template_with_steps("step-agent", program)],
        vec![stream(vec![end_turn("tc-1")])],
        Some(reader_delegate()),
        None,
    );

    let outcome = run_agent(&bed.env, "step-agent", "read it", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(bed.llm.call_count(), 1);
    assert_eq!(outcome.steps_taken, 1);

    let history = &outcome.state.message_history;
    assert_pairing(history);
    assert_eq!(
        history_shape(history),
        [
            "system:text",
            "user:text",
            "assistant:tool_call", // read_files
            "tool:tool_result",
            "assistant:tool_call", // end_turn
            "tool:tool_result",
        ]
    );

    // The generator registry holds nothing for the finished run.
    assert!(!bed.env.generators.has_entries(&outcome.state.run_id));
}

#[tokio::test]
async fn step_all_program_is_equivalent_to_plain_template() {
    let scripted = |id: &str, program: Option<StepProgram>| {
        let mut builder = AgentTemplate::builder(id, "mock-model")
            .system_prompt("sys")
            .tools(["set_output", "end_turn"]);
        if let Some(program) = program {
            builder = builder.handle_steps(program);
        }
        builder.build().expect("template builds")
    };
    let responses = || {
        vec![
            stream(vec![
                LlmChunk::text("working"),
                call("tc-1", "set_output", json!({ "n": 1 })),
            ]),
            stream(vec![end_turn("tc-2")]),
        ]
    };

    let plain_bed = bed(vec![scripted("plain-agent", None)], responses());
    let plain = run_agent(&plain_bed.env, "plain-agent", "go", CancellationSignal::new())
        .await
        .expect("run resolves");

    let program = StepProgram::native(|mut handle: StepHandle| async move {
        handle.step_all().await?;
        Ok(())
    });
    let stepped_bed = bed(vec![scripted("stepped-agent", Some(program))], responses());
    let stepped = run_agent(
        &stepped_bed.env,
        "stepped-agent",
        "go",
        CancellationSignal::new(),
    )
    .await
    .expect("run resolves");

    assert_eq!(plain.status, stepped.status);
    assert_eq!(plain_bed.llm.call_count(), stepped_bed.llm.call_count());
    assert_eq!(
        history_shape(&plain.state.message_history),
        history_shape(&stepped.state.message_history),
    );
    assert_eq!(plain.state.output, stepped.state.output);
}

#[tokio::test]
async fn generate_n_feeds_responses_back() {
    let program = StepProgram::native(|mut handle: StepHandle| async move {
        let responses = handle.generate_n(2).await?;
        assert_eq!(responses, ["first draft", "second draft"]);
        Ok(())
    });

    let bed = bed(
        vec![template_with_steps("sampler-agent", program)],
        vec![MockResponse::Completions(vec![
            "first draft".to_owned(),
            "second draft".to_owned(),
        ])],
    );

    let outcome = run_agent(&bed.env, "sampler-agent", "sample", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(bed.llm.call_count(), 1);
    // An n-shot completion is not an agent step and leaves no history.
    assert_eq!(outcome.steps_taken, 0);
}

#[tokio::test]
async fn hidden_tool_invocation_stays_out_of_history() {
    let program = StepProgram::native(|mut handle: StepHandle| async move {
        handle
            .invoke_tool_hidden("set_output", json!({ "secret": true }))
            .await?;
        Ok(())
    });

    let bed = bed(vec![template_with_steps("hidden-agent", program)], vec![]);
    let outcome = run_agent(&bed.env, "hidden-agent", "work", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(outcome.state.output, Some(json!({ "secret": true })));
    assert!(
        outcome
            .state
            .message_history
            .iter()
            .all(|message| message.role != Role::Tool && !message.has_tool_call()),
        "hidden call must not touch the history"
    );
}

#[tokio::test]
async fn step_text_records_segments_and_executes_calls() {
    let text = format!(
        "The answer is 42. {}",
        embed_tool_call("end_turn", &json!({}))
    );
    let program = StepProgram::native(move |mut handle: StepHandle| {
        let text = text.clone();
        async move {
            handle.step_text(text).await?;
            Ok(())
        }
    });

    let bed = bed(vec![template_with_steps("writer-agent", program)], vec![]);
    let outcome = run_agent(&bed.env, "writer-agent", "answer", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(bed.llm.call_count(), 0, "no LLM involved");

    let history = &outcome.state.message_history;
    assert_pairing(history);
    assert_eq!(
        history_shape(history),
        [
            "system:text",
            "user:text",
            "assistant:text",
            "assistant:tool_call",
            "tool:tool_result",
        ]
    );
    assert_eq!(
        outcome.output,
        RunOutput::LastMessage {
            text: "The answer is 42. ".to_owned()
        }
    );
}

#[tokio::test]
async fn generator_failure_fails_the_run() {
    let program = StepProgram::native(|_handle: StepHandle| async move {
        Err(StepError::failed("bad state"))
    });

    let bed = bed(vec![template_with_steps("failing-agent", program)], vec![]);
    let outcome = run_agent(&bed.env, "failing-agent", "try", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert_eq!(outcome.output.error_message(), Some("bad state"));
    assert_eq!(
        outcome.state.output.as_ref().and_then(|o| o.get("error")),
        Some(&json!("bad state"))
    );
    assert!(
        outcome
            .state
            .message_history
            .iter()
            .filter_map(levelcode::Message::text_content)
            .any(|text| text.contains("bad state")),
        "the failure is surfaced in the history"
    );
    assert!(!bed.env.generators.has_entries(&outcome.state.run_id));
}

#[tokio::test]
async fn source_program_runs_tools_and_steps() {
    let program = StepProgram::source(
        r#"[
            {"tool_name": "set_output", "input": {"stage": "ready"}},
            "STEP"
        ]"#,
    );

    let bed = bed(
        vec![template_with_steps("source-agent", program)],
        vec![stream(vec![end_turn("tc-1")])],
    );

    let outcome = run_agent(&bed.env, "source-agent", "go", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(outcome.state.output, Some(json!({ "stage": "ready" })));
    assert_eq!(bed.llm.call_count(), 1);
}

#[tokio::test]
async fn proposed_content_store_is_cleared_at_end_of_run() {
    let template = AgentTemplate::builder("editor-agent", "mock-model")
        .system_prompt("sys")
        .tools(["propose_write_file", "propose_str_replace", "end_turn"])
        .build()
        .expect("template builds");

    let bed = bed_with(
        vec![template],
        vec![stream(vec![
            call(
                "tc-1",
                "propose_write_file",
                json!({ "path": "b.txt", "content": "draft one" }),
            ),
            call(
                "tc-2",
                "propose_str_replace",
                json!({ "path": "b.txt", "old": "one", "new": "two" }),
            ),
            end_turn("tc-3"),
        ])],
        Some(reader_delegate()),
        None,
    );

    let outcome = run_agent(&bed.env, "editor-agent", "edit", CancellationSignal::new())
        .await
        .expect("run resolves");

    assert_eq!(outcome.status, TerminalStatus::Completed);
    let history = &outcome.state.message_history;
    assert_pairing(history);
    assert!(
        history
            .iter()
            .filter_map(levelcode::Message::text_content)
            .any(|text| text.contains("Proposed replacement in b.txt")),
    );
    assert!(!bed.env.proposed.has_entries(&outcome.state.run_id));
}

#[tokio::test]
async fn str_replace_requires_unique_occurrence() {
    let template = AgentTemplate::builder("editor-agent", "mock-model")
        .system_prompt("sys")
        .tools(["propose_write_file", "propose_str_replace", "end_turn"])
        .build()
        .expect("template builds");

    let bed = bed_with(
        vec![template],
        vec![stream(vec![
            call(
                "tc-1",
                "propose_write_file",
                json!({ "path": "c.txt", "content": "aa bb aa" }),
            ),
            call(
                "tc-2",
                "propose_str_replace",
                json!({ "path": "c.txt", "old": "aa", "new": "zz" }),
            ),
            end_turn("tc-3"),
        ])],
        None,
        None,
    );

    let outcome = run_agent(&bed.env, "editor-agent", "edit", CancellationSignal::new())
        .await
        .expect("run resolves");

    // The replace failed but kept its call/result pairing.
    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_pairing(&outcome.state.message_history);
    let error_bodies: Vec<String> = outcome
        .state
        .message_history
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|part| match part {
            ContentPart::ToolResult { output, .. } => Some(output),
            _ => None,
        })
        .flatten()
        .filter_map(|part| match part {
            ToolResultPart::Json { value } => {
                value.get("errorMessage").map(std::string::ToString::to_string)
            }
            ToolResultPart::Text { .. } => None,
        })
        .collect();
    assert!(
        error_bodies.iter().any(|body| body.contains("2 times")),
        "non-unique replacement is reported: {error_bodies:?}"
    );
}
