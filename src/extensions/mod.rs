//! Extension negotiation and the frame transform pipeline (RFC 6455
//! Section 9).
//!
//! Extensions are offered during the handshake, constructed from the
//! server's selection, and then transform every data frame: incoming
//! frames pass through the pipeline in order, outgoing frames in reverse
//! order. Each extension declares the RSV bits it owns; the codec admits
//! those bits only when an owning extension is active.

#[cfg(feature = "compression")]
pub mod deflate;

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::Frame;

/// A single `name[=value]` extension parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name (e.g. "client_max_window_bits").
    pub name: String,
    /// Parameter value; `None` for flag parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// A parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// A flag parameter.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `name`, `name=value`, or `name="value"`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: Some(value.trim().trim_matches('"').to_string()),
            },
            None => Self::flag(s),
        }
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One entry of a `Sec-WebSocket-Extensions` header: an extension name
/// plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name (e.g. "permessage-deflate").
    pub name: String,
    /// Parameters, in header order.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Parse one `;`-separated entry.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` for an empty name.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or("").trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidExtension("empty extension name".into()));
        }
        let params = parts.map(ExtensionParam::parse).collect();
        Ok(Self { name, params })
    }

    /// Parse a full header value: comma-separated entries.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` if any entry is malformed.
    pub fn parse_header(header: &str) -> Result<Vec<Self>> {
        header.split(',').map(|s| Self::parse(s.trim())).collect()
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether a parameter is present.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.get_param(name).is_some()
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

/// RSV bit ownership declaration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsvBits {
    /// RSV1 (permessage-deflate).
    pub rsv1: bool,
    /// RSV2.
    pub rsv2: bool,
    /// RSV3.
    pub rsv3: bool,
}

impl RsvBits {
    /// No bits owned.
    pub const NONE: Self = Self {
        rsv1: false,
        rsv2: false,
        rsv3: false,
    };

    /// RSV1 only.
    pub const RSV1: Self = Self {
        rsv1: true,
        rsv2: false,
        rsv3: false,
    };

    /// Whether any bit overlaps with `other`.
    #[must_use]
    pub fn conflicts_with(&self, other: &RsvBits) -> bool {
        (self.rsv1 && other.rsv1) || (self.rsv2 && other.rsv2) || (self.rsv3 && other.rsv3)
    }

    /// Whether a frame's RSV bits fall entirely within the owned set.
    #[must_use]
    pub fn covers(&self, rsv1: bool, rsv2: bool, rsv3: bool) -> bool {
        (!rsv1 || self.rsv1) && (!rsv2 || self.rsv2) && (!rsv3 || self.rsv3)
    }
}

/// An active per-connection extension instance.
///
/// `decode` is applied to incoming whole-message frames in pipeline order;
/// `encode` to outgoing whole-message frames in reverse order. Control
/// frames never enter the pipeline.
pub trait Extension: Send {
    /// Extension name as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// RSV bits this instance owns.
    fn rsv_bits(&self) -> RsvBits {
        RsvBits::NONE
    }

    /// Transform an outgoing frame (may set owned RSV bits).
    ///
    /// # Errors
    ///
    /// `Error::Extension` when the transform fails.
    fn encode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Transform an incoming frame (must clear owned RSV bits it consumed).
    ///
    /// # Errors
    ///
    /// `Error::Extension` when the transform fails, or
    /// `Error::DecompressedTooLarge` past the configured cap.
    fn decode(&mut self, frame: &mut Frame) -> Result<()>;

    /// Release per-connection resources. Called once when the connection
    /// is torn down, including on cancellation.
    fn shutdown(&mut self) {}
}

/// Factory registered in [`Options`](crate::Options); constructs the
/// per-connection [`Extension`] from the server's selected parameters.
pub trait ExtensionBuilder {
    /// Extension name to match against the server's selection.
    fn name(&self) -> &str;

    /// Whether this extension takes part in negotiation. Non-negotiated
    /// extensions are instantiated unconditionally and appear in no
    /// header.
    fn negotiable(&self) -> bool {
        true
    }

    /// Parameters to offer in the upgrade request.
    fn offer_params(&self) -> Vec<ExtensionParam> {
        Vec::new()
    }

    /// Construct the active extension from the server's parameters.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` if the server's parameters are
    /// unacceptable; this fails the upgrade.
    fn build(&self, params: &[ExtensionParam]) -> Result<Box<dyn Extension>>;
}

/// The ordered set of active extensions for one connection.
#[derive(Default)]
pub struct ExtensionPipeline {
    stages: Vec<Box<dyn Extension>>,
    claimed: RsvBits,
}

impl ExtensionPipeline {
    /// An empty pipeline (no extensions negotiated).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compose the `Sec-WebSocket-Extensions` offer lines for the
    /// registered builders, one per negotiable builder.
    pub fn offers(builders: &[Box<dyn ExtensionBuilder + Send + Sync>]) -> Vec<String> {
        builders
            .iter()
            .filter(|b| b.negotiable())
            .map(|b| {
                let mut offer = b.name().to_string();
                for param in b.offer_params() {
                    offer.push_str("; ");
                    offer.push_str(&param.to_string());
                }
                offer
            })
            .collect()
    }

    /// Instantiate the pipeline from the server's selected extensions.
    ///
    /// For each registered builder, in order: a non-negotiable builder is
    /// always instantiated; a negotiable one is instantiated from the
    /// first response entry bearing its name, and stays inactive without
    /// one.
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` when a builder rejects the server's
    /// parameters or two active extensions claim the same RSV bit.
    pub fn negotiate(
        builders: &[Box<dyn ExtensionBuilder + Send + Sync>],
        selected: &[ExtensionOffer],
    ) -> Result<Self> {
        let mut pipeline = Self::empty();

        for builder in builders {
            let stage = if builder.negotiable() {
                match selected.iter().find(|offer| offer.name == builder.name()) {
                    Some(offer) => Some(builder.build(&offer.params)?),
                    None => None,
                }
            } else {
                Some(builder.build(&[])?)
            };

            if let Some(stage) = stage {
                let rsv = stage.rsv_bits();
                if pipeline.claimed.conflicts_with(&rsv) {
                    return Err(Error::InvalidExtension(format!(
                        "extension '{}' claims an RSV bit already in use",
                        stage.name()
                    )));
                }
                pipeline.claimed.rsv1 |= rsv.rsv1;
                pipeline.claimed.rsv2 |= rsv.rsv2;
                pipeline.claimed.rsv3 |= rsv.rsv3;
                log::debug!("extension active: {}", stage.name());
                pipeline.stages.push(stage);
            }
        }

        Ok(pipeline)
    }

    /// RSV bits owned by the active extensions.
    #[must_use]
    pub fn claimed_rsv(&self) -> RsvBits {
        self.claimed
    }

    /// Number of active extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no extension is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Transform an outgoing whole-message frame, last stage first.
    ///
    /// # Errors
    ///
    /// Propagates the failing stage's error.
    pub fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        for stage in self.stages.iter_mut().rev() {
            stage.encode(frame)?;
        }
        Ok(())
    }

    /// Transform an incoming whole-message frame, first stage first.
    ///
    /// # Errors
    ///
    /// Propagates the failing stage's error.
    pub fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        for stage in &mut self.stages {
            stage.decode(frame)?;
        }
        Ok(())
    }
}

impl Drop for ExtensionPipeline {
    fn drop(&mut self) {
        for stage in &mut self.stages {
            stage.shutdown();
        }
    }
}

impl fmt::Debug for ExtensionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("claimed", &self.claimed)
            .finish()
    }
}
