//! Terminal chat session.
//!
//! Reads one question per line, streams the answer as it is generated and
//! keeps going after failures: an error is printed inline as
//! `Error: ...` and the next question is read. `exit`, `quit` or end of
//! input ends the session.

use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::chain::{build_rag_chain, RagChain};
use crate::config::Config;
use crate::error::Result;
use crate::prompts::PromptLoader;

const PROMPT: &str = "> ";

/// Run the interactive session on stdin/stdout.
pub async fn run_chat(config: &Config) -> Result<()> {
    let loader = PromptLoader::new(&config.prompts_dir);
    let (system, user) = loader.load_pair(config)?;
    let components = build_rag_chain(&system, &user, config)?;

    println!("docchat: ask about the ingested document (\"exit\" to quit)");
    let stdin = BufReader::new(tokio::io::stdin());
    chat_loop(&components.chain, stdin, tokio::io::stdout()).await?;

    let stats = components.tracer.stats();
    tracing::info!(
        runs = stats.runs,
        failed_runs = stats.failed_runs,
        tokens = stats.tokens,
        "chat session ended"
    );
    Ok(())
}

/// Drive a session over arbitrary input and output. Returns the number of
/// questions asked.
pub async fn chat_loop<R, W>(chain: &RagChain, input: R, mut output: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut asked = 0;

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            output.write_all(b"\n").await?;
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }
        asked += 1;

        let mut tokens = chain.stream(query);
        while let Some(token) = tokens.next().await {
            match token {
                Ok(text) => {
                    output.write_all(text.as_bytes()).await?;
                    output.flush().await?;
                }
                Err(e) => {
                    output
                        .write_all(format!("Error: {}", e).as_bytes())
                        .await?;
                    break;
                }
            }
        }
        output.write_all(b"\n\n").await?;
    }

    output.flush().await?;
    Ok(asked)
}
