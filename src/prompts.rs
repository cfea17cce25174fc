//! System prompts

/// Base prompt for the plain tool-calling assistant.
pub fn default_system_prompt() -> String {
    "You are an operational assistant for a multi-trader crypto trading system. \
     You help the operator check balances and positions, control traders, and \
     place or close orders on their explicit instruction.\n\n\
     Rules:\n\
     - Use tools to answer questions about live state; never invent figures.\n\
     - Confirm the trader, symbol, size and leverage before any order action.\n\
     - Report numbers exactly as tools return them.\n\
     - Answer briefly and concretely."
        .to_string()
}

/// Prompt for the context-aware assistant. The live portfolio digest is
/// appended after this text each turn, so it tells the model the digest is
/// authoritative for current state.
pub fn context_aware_system_prompt() -> String {
    let mut prompt = default_system_prompt();
    prompt.push_str(
        "\n\nA live snapshot of account balances, open positions and alerts \
         follows below. Treat it as the current state; only call tools when \
         you need something the snapshot does not show, such as prices for \
         other symbols or order actions.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prompt_extends_default() {
        let base = default_system_prompt();
        let aware = context_aware_system_prompt();
        assert!(aware.starts_with(&base));
        assert!(aware.contains("snapshot"));
    }
}
