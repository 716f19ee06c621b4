use std::{collections::HashMap, fmt};

/// The name of the HTTP tracing header, as it should be sent on the wire.
/// Lookups against an incoming header map must be case-insensitive.
pub const HTTP_HEADER_NAME: &str = "X-Amzn-Trace-Id";

/// RPC metadata key carrying the trace id.
pub const RPC_ROOT_KEY: &str = "xray-rootid";
/// RPC metadata key carrying the parent segment id.
pub const RPC_PARENT_KEY: &str = "xray-parentid";
/// RPC metadata key carrying the sampling decision.
pub const RPC_SAMPLED_KEY: &str = "xray-sampled";
/// RPC metadata key carrying the registry lookup key (the trace id, used to
/// recover the live `Segment` object from the process-local registry).
pub const RPC_SEGMENT_KEY: &str = "xray-segment";

/// The tri-state sampling decision carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingDecision {
    /// The segment has been sampled and will be recorded.
    Sampled,
    /// The segment has not been sampled.
    NotSampled,
    /// No local decision was made; resolve it with the `Sampler`.
    #[default]
    Unspecified,
}

impl SamplingDecision {
    fn as_wire_str(self) -> &'static str {
        match self {
            SamplingDecision::Sampled => "1",
            SamplingDecision::NotSampled => "0",
            SamplingDecision::Unspecified => "",
        }
    }

    fn from_wire_str(value: &str) -> Self {
        match value {
            "1" => SamplingDecision::Sampled,
            "0" => SamplingDecision::NotSampled,
            _ => SamplingDecision::Unspecified,
        }
    }
}

/// A trace context carried across an in-process or cross-process boundary:
/// the root trace id, the immediate parent id, and the sampling decision
/// made upstream (if any).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceContext {
    /// The upstream trace id, or empty if this call starts a new trace.
    pub root: String,
    /// The upstream segment or subsegment id, or empty if there is none.
    pub parent: String,
    /// The sampling decision made upstream, if any.
    pub sampled: SamplingDecision,
}

impl TraceContext {
    /// A context carrying no inherited trace information: `OpenSegment`
    /// treats this as the start of a brand new trace.
    pub fn none() -> Self {
        TraceContext::default()
    }

    /// Encodes this context as an `X-Amzn-Trace-Id` header value:
    /// `Root=<trace>; Parent=<id>; Sampled=<0|1>`.
    pub fn encode_http_header(&self) -> String {
        format!(
            "Root={}; Parent={}; Sampled={}",
            self.root,
            self.parent,
            self.sampled.as_wire_str()
        )
    }

    /// Parses an `X-Amzn-Trace-Id` header value. Whitespace around each
    /// `;`-separated pair is stripped; unrecognized keys are ignored;
    /// missing fields remain empty strings rather than producing an error.
    pub fn decode_http_header(raw: &str) -> Self {
        let mut ctx = TraceContext::default();
        for pair in raw.split(';') {
            let pair = pair.trim();
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key.trim() {
                "Root" => ctx.root = value.trim().to_owned(),
                "Parent" => ctx.parent = value.trim().to_owned(),
                "Sampled" => ctx.sampled = SamplingDecision::from_wire_str(value.trim()),
                _ => {}
            }
        }
        ctx
    }

    /// Looks up the `X-Amzn-Trace-Id` header in `headers` (case-insensitive
    /// key match) and decodes it, or returns an empty context if absent.
    pub fn decode_http_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in headers {
            if key.eq_ignore_ascii_case(HTTP_HEADER_NAME) {
                return Self::decode_http_header(value);
            }
        }
        TraceContext::default()
    }

    /// Encodes this context as RPC metadata entries.
    pub fn encode_rpc_metadata(&self) -> HashMap<String, String> {
        let mut md = HashMap::with_capacity(3);
        md.insert(RPC_ROOT_KEY.to_owned(), self.root.clone());
        md.insert(RPC_PARENT_KEY.to_owned(), self.parent.clone());
        md.insert(
            RPC_SAMPLED_KEY.to_owned(),
            self.sampled.as_wire_str().to_owned(),
        );
        md
    }

    /// Decodes a context from RPC metadata entries.
    pub fn decode_rpc_metadata<'a, I>(metadata: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ctx = TraceContext::default();
        for (key, value) in metadata {
            match key {
                k if k == RPC_ROOT_KEY => ctx.root = value.to_owned(),
                k if k == RPC_PARENT_KEY => ctx.parent = value.to_owned(),
                k if k == RPC_SAMPLED_KEY => ctx.sampled = SamplingDecision::from_wire_str(value),
                _ => {}
            }
        }
        ctx
    }
}

impl fmt::Display for TraceContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.encode_http_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_http_header() {
        let ctx = TraceContext {
            root: "1-5759e988-bd862e3fe1be46a994272793".into(),
            parent: "53995c3f42cd8ad8".into(),
            sampled: SamplingDecision::Sampled,
        };
        let decoded = TraceContext::decode_http_header(&ctx.encode_http_header());
        assert_eq!(decoded, ctx);
    }

    #[test]
    fn parses_with_stripped_whitespace() {
        let decoded = TraceContext::decode_http_header(
            "Root=1-5759e988-bd862e3fe1be46a994272793 ; Parent=53995c3f42cd8ad8 ; Sampled=1",
        );
        assert_eq!(decoded.root, "1-5759e988-bd862e3fe1be46a994272793");
        assert_eq!(decoded.parent, "53995c3f42cd8ad8");
        assert_eq!(decoded.sampled, SamplingDecision::Sampled);
    }

    #[test]
    fn missing_sampled_field_is_unspecified() {
        let decoded =
            TraceContext::decode_http_header("Root=1-5759e988-bd862e3fe1be46a994272793");
        assert_eq!(decoded.sampled, SamplingDecision::Unspecified);
        assert_eq!(decoded.parent, "");
    }

    #[test]
    fn ignores_unknown_keys() {
        let decoded = TraceContext::decode_http_header("Root=abc; Self=1; Sampled=0");
        assert_eq!(decoded.root, "abc");
        assert_eq!(decoded.sampled, SamplingDecision::NotSampled);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![("x-amzn-trace-id", "Root=abc; Sampled=1")];
        let decoded = TraceContext::decode_http_headers(headers);
        assert_eq!(decoded.root, "abc");
    }

    #[test]
    fn round_trips_through_rpc_metadata() {
        let ctx = TraceContext {
            root: "1-abc".into(),
            parent: "deadbeef".into(),
            sampled: SamplingDecision::Sampled,
        };
        let md = ctx.encode_rpc_metadata();
        let borrowed: Vec<(&str, &str)> = md.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(TraceContext::decode_rpc_metadata(borrowed), ctx);
    }
}
