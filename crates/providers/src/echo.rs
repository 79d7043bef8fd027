//! Offline executor. Replies deterministically without any network access;
//! used for smoke tests and for running the gateway without credentials.

use sb_domain::error::Result;
use tokio_util::sync::CancellationToken;

use crate::traits::{AgentExecutor, RunRequest, RunResult, Usage};
use crate::util::{with_cancel, word_count};

#[derive(Debug, Default, Clone)]
pub struct EchoExecutor;

#[async_trait::async_trait]
impl AgentExecutor for EchoExecutor {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<RunResult> {
        with_cancel(cancel, async {
            let reply = format!("echo: {}", req.body);
            let input_tokens = req
                .history
                .iter()
                .map(|h| word_count(&h.content))
                .sum::<u64>()
                + word_count(&req.body);
            Ok(RunResult {
                usage: Usage {
                    input_tokens,
                    output_tokens: word_count(&reply),
                },
                reply,
                model: req.model.clone().unwrap_or_else(|| "echo".into()),
            })
        })
        .await
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::chat::{HistoryEntry, Role};

    #[tokio::test]
    async fn echoes_and_counts_words() {
        let req = RunRequest {
            body: "hello there".into(),
            history: vec![HistoryEntry::new(Role::User, "one two three")],
            ..Default::default()
        };
        let res = EchoExecutor.run(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(res.reply, "echo: hello there");
        assert_eq!(res.usage.input_tokens, 5);
        assert_eq!(res.usage.output_tokens, 3);
        assert_eq!(res.model, "echo");
    }
}
