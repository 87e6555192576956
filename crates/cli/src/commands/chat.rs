use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::commands::{current_thread_runtime, load_config, CommandResult};
use shopkeep_agent::{
    AgentRuntime, ApprovalRequest, OpenAiCompatibleClient, ToolDispatcher, TurnRequest, TurnResult,
};
use shopkeep_core::domain::conversation::SessionId;
use shopkeep_core::domain::customer::CustomerId;
use shopkeep_db::{
    connect_with_config, migrations, SqlCheckpointStore, SqlCommerceStore, SqlProductRepository,
};

const APPROVE_ANSWERS: &[&str] = &["y", "yes", "có", "dong y", "đồng ý"];

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub customer_id: Option<String>,
    pub session_id: Option<String>,
}

pub fn run(options: ChatOptions) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let llm = OpenAiCompatibleClient::from_config(&config)
            .map_err(|error| ("llm_client", error.to_string(), 6u8))?;
        let store = Arc::new(SqlCommerceStore::new(pool.clone()));
        let search = Arc::new(SqlProductRepository::new(pool.clone()));
        let agent = AgentRuntime::from_config(
            &config,
            Arc::new(llm),
            ToolDispatcher::new(store, search),
            Arc::new(SqlCheckpointStore::new(pool.clone())),
        );

        let stdin = io::stdin();
        let session = converse(&agent, options, stdin.lock(), io::stdout())
            .await
            .map_err(|error| ("terminal_io", error.to_string(), 7u8))?;
        pool.close().await;
        Ok::<Option<SessionId>, (&'static str, String, u8)>(session)
    });

    match result {
        Ok(Some(session_id)) => {
            CommandResult::success("chat", format!("session {} closed", session_id.0))
        }
        Ok(None) => CommandResult::success("chat", "no session started"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

/// Line-oriented chat loop. Ends on EOF, `exit` or `quit` and returns the last
/// session used.
pub async fn converse<R: BufRead, W: Write>(
    runtime: &AgentRuntime,
    options: ChatOptions,
    mut input: R,
    mut output: W,
) -> io::Result<Option<SessionId>> {
    let customer_id = options.customer_id.map(CustomerId);
    let mut session_id = options.session_id.map(SessionId);

    loop {
        let Some(line) = prompt(&mut input, &mut output, "bạn> ")? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "exit" | "quit") {
            break;
        }

        let request = TurnRequest {
            session_id: session_id.clone(),
            customer_id: customer_id.clone(),
            message: message.to_string(),
        };
        let mut result = runtime.handle_turn(request).await;
        session_id = Some(result.session_id.clone());
        render(&mut output, &result)?;

        while result.waiting_for_approval() {
            let Some(answer) =
                prompt(&mut input, &mut output, "xác nhận (y) hoặc nhập lý do từ chối> ")?
            else {
                return Ok(session_id);
            };
            let answer = answer.trim();
            let decision = if is_approval(answer) {
                ApprovalRequest::approve(result.session_id.clone())
            } else {
                let reason = (!answer.is_empty()).then(|| answer.to_string());
                ApprovalRequest::reject(result.session_id.clone(), reason)
            };
            result = runtime.resolve(decision).await;
            render(&mut output, &result)?;
        }
    }

    Ok(session_id)
}

fn is_approval(answer: &str) -> bool {
    let answer = answer.to_lowercase();
    APPROVE_ANSWERS.contains(&answer.as_str())
}

fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
) -> io::Result<Option<String>> {
    write!(output, "{label}")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn render<W: Write>(output: &mut W, result: &TurnResult) -> io::Result<()> {
    writeln!(output, "shop> {}", result.response)?;
    if let Some(code) = &result.error_code {
        writeln!(output, "      (mã lỗi: {code})")?;
    }
    if !result.selections.is_empty() {
        let options =
            result.selections.iter().map(|option| format!("[{}]", option.text)).collect::<Vec<_>>();
        writeln!(output, "      {}", options.join(" "))?;
    }
    Ok(())
}
