use alloy_primitives::Address;
use ethers_core::abi::{parse_abi, Function, Token};
use tracing::debug;

use crate::errors::{Result, UpgradeError};
use crate::read::ChainReader;

/// A typed read call to issue against the proxy after an upgrade, declared
/// with a human-readable function signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeSpec {
    /// The field name the result is reported under.
    pub field: String,
    /// Full function declaration, e.g.
    /// `function isPaused() external view returns (bool)`.
    pub signature: String,
}

impl ProbeSpec {
    /// The version-identifier probe every verification pass starts with.
    pub fn version() -> Self {
        Self {
            field: "version".into(),
            signature: "function version() external view returns (string)".into(),
        }
    }

    /// Parses an operator-supplied probe such as
    /// `vendingMachineName() returns (string)`.
    pub fn parse(spec: &str) -> Result<Self> {
        let field = spec
            .split('(')
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| UpgradeError::Config(format!("malformed probe: {spec:?}")))?
            .to_string();
        let probe = Self {
            field,
            signature: format!("function {spec}"),
        };
        // Reject unparseable signatures up front, not mid-verification.
        probe.function()?;
        Ok(probe)
    }

    fn function(&self) -> Result<Function> {
        let abi = parse_abi(&[self.signature.as_str()])
            .map_err(|e| UpgradeError::Config(format!("bad probe {:?}: {e}", self.signature)))?;
        let function = abi
            .functions()
            .next()
            .cloned()
            .ok_or_else(|| UpgradeError::Config(format!("bad probe {:?}", self.signature)))?;
        if !function.inputs.is_empty() {
            return Err(UpgradeError::Config(format!(
                "probe {:?} takes arguments; probes must be nullary reads",
                self.field
            )));
        }
        Ok(function)
    }

    /// Issues the probe against `target` and renders the decoded result.
    pub async fn call<C: ChainReader>(&self, chain: &C, target: Address) -> Result<String> {
        let function = self.function()?;
        let calldata = function
            .encode_input(&[])
            .map_err(|e| UpgradeError::Config(format!("bad probe {:?}: {e}", self.signature)))?;
        let output = chain.call(target, calldata).await?;
        let tokens = function
            .decode_output(&output)
            .map_err(|e| UpgradeError::Rpc(format!("undecodable return from {}: {e}", self.field)))?;
        let rendered = render_tokens(&tokens);
        debug!("probe {} -> {rendered}", self.field);
        Ok(rendered)
    }
}

fn render_token(token: &Token) -> String {
    match token {
        Token::String(s) => s.clone(),
        Token::Bool(b) => b.to_string(),
        Token::Uint(n) | Token::Int(n) => n.to_string(),
        Token::Address(a) => format!("{a:?}"),
        Token::Bytes(b) | Token::FixedBytes(b) => format!("0x{}", hex::encode(b)),
        other => format!("{other:?}"),
    }
}

fn render_tokens(tokens: &[Token]) -> String {
    tokens.iter().map(render_token).collect::<Vec<_>>().join(", ")
}
