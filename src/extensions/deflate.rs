//! permessage-deflate compression extension (RFC 7692).
//!
//! Whole messages are deflated, not individual frames: the connection
//! hands this extension fully assembled payloads. On send the trailing
//! `0x00 0x00 0xFF 0xFF` is stripped and RSV1 set; on receive the trailer
//! is re-appended before inflating. `no_context_takeover` for a side
//! resets that side's stream state at every message boundary.
//!
//! Window sizing below 15 bits requires the zlib backend (`zlib` feature);
//! with the default backend the parameters are still negotiated but the
//! codec runs with a full-size window, which remains wire-compatible.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionBuilder, ExtensionParam, RsvBits};
use crate::protocol::Frame;

const EXTENSION_NAME: &str = "permessage-deflate";
const MIN_WINDOW_BITS: u8 = 9;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const CHUNK: usize = 4096;
const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Client-side configuration and offer parameters for permessage-deflate.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Ask the server to reset its compression context per message.
    pub server_no_context_takeover: bool,
    /// Volunteer to reset our compression context per message.
    pub client_no_context_takeover: bool,
    /// Inflate window to request of the server (9-15). `None` omits the
    /// parameter, leaving the server at its default.
    pub server_max_window_bits: Option<u8>,
    /// Deflate window to offer for our side (9-15). `None` offers the bare
    /// `client_max_window_bits` parameter, letting the server pick.
    pub client_max_window_bits: Option<u8>,
    /// Deflate level, 0-9. Default 6.
    pub compression_level: u32,
    /// Inflated-size cap per message; exceeding it closes with 1009.
    pub max_decompressed_size: usize,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: None,
            client_max_window_bits: None,
            compression_level: 6,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl DeflateConfig {
    /// Defaults: offer `client_max_window_bits`, full windows, level 6.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request per-message context reset from the server.
    #[must_use]
    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    /// Volunteer per-message context reset for our side.
    #[must_use]
    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// Request a server inflate window of `bits` (9-15).
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` outside the range.
    pub fn server_max_window_bits(mut self, bits: u8) -> Result<Self> {
        check_window_bits(bits)?;
        self.server_max_window_bits = Some(bits);
        Ok(self)
    }

    /// Offer a client deflate window of `bits` (9-15).
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` outside the range.
    pub fn client_max_window_bits(mut self, bits: u8) -> Result<Self> {
        check_window_bits(bits)?;
        self.client_max_window_bits = Some(bits);
        Ok(self)
    }

    /// Set the deflate level (0-9).
    ///
    /// # Errors
    ///
    /// `Error::InvalidExtension` past 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::InvalidExtension(format!(
                "compression_level must be 0-9, got {}",
                level
            )));
        }
        self.compression_level = level;
        Ok(self)
    }

    /// Cap the inflated size of a single message.
    #[must_use]
    pub fn max_decompressed_size(mut self, size: usize) -> Self {
        self.max_decompressed_size = size;
        self
    }
}

fn check_window_bits(bits: u8) -> Result<()> {
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidExtension(format!(
            "window bits must be {}-{}, got {}",
            MIN_WINDOW_BITS, MAX_WINDOW_BITS, bits
        )));
    }
    Ok(())
}

fn parse_window_bits(value: Option<&str>) -> Result<u8> {
    match value {
        Some(s) => {
            let bits: u8 = s
                .parse()
                .map_err(|_| Error::InvalidExtension(format!("invalid window bits: {}", s)))?;
            check_window_bits(bits)?;
            Ok(bits)
        }
        None => Ok(MAX_WINDOW_BITS),
    }
}

/// Builder registered in [`Options`](crate::Options); offers
/// permessage-deflate and constructs the active codec from the server's
/// selection.
#[derive(Debug, Clone, Default)]
pub struct DeflateBuilder {
    config: DeflateConfig,
}

impl DeflateBuilder {
    /// Builder with the given configuration.
    #[must_use]
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }
}

impl ExtensionBuilder for DeflateBuilder {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn offer_params(&self) -> Vec<ExtensionParam> {
        let mut params = Vec::new();
        // Always offered; without a value the server may pick our window.
        match self.config.client_max_window_bits {
            Some(bits) => params.push(ExtensionParam::new(
                "client_max_window_bits",
                bits.to_string(),
            )),
            None => params.push(ExtensionParam::flag("client_max_window_bits")),
        }
        if let Some(bits) = self.config.server_max_window_bits {
            params.push(ExtensionParam::new(
                "server_max_window_bits",
                bits.to_string(),
            ));
        }
        if self.config.server_no_context_takeover {
            params.push(ExtensionParam::flag("server_no_context_takeover"));
        }
        if self.config.client_no_context_takeover {
            params.push(ExtensionParam::flag("client_no_context_takeover"));
        }
        params
    }

    fn build(&self, params: &[ExtensionParam]) -> Result<Box<dyn Extension>> {
        let mut settings = NegotiatedDeflate {
            compress_window: self.config.client_max_window_bits.unwrap_or(MAX_WINDOW_BITS),
            decompress_window: MAX_WINDOW_BITS,
            reset_compress: self.config.client_no_context_takeover,
            reset_decompress: false,
            level: self.config.compression_level,
            max_decompressed: self.config.max_decompressed_size,
        };

        for param in params {
            match param.name.as_str() {
                "server_no_context_takeover" => settings.reset_decompress = true,
                "client_no_context_takeover" => settings.reset_compress = true,
                "server_max_window_bits" => {
                    settings.decompress_window = parse_window_bits(param.value.as_deref())?;
                }
                "client_max_window_bits" => {
                    settings.compress_window = parse_window_bits(param.value.as_deref())?;
                }
                other => {
                    return Err(Error::InvalidExtension(format!(
                        "unknown permessage-deflate parameter: {}",
                        other
                    )));
                }
            }
        }

        log::debug!(
            "permessage-deflate negotiated: compress_window={} decompress_window={} \
             reset_compress={} reset_decompress={}",
            settings.compress_window,
            settings.decompress_window,
            settings.reset_compress,
            settings.reset_decompress,
        );

        Ok(Box::new(DeflateExtension::new(settings)))
    }
}

#[derive(Debug, Clone)]
struct NegotiatedDeflate {
    compress_window: u8,
    decompress_window: u8,
    reset_compress: bool,
    reset_decompress: bool,
    level: u32,
    max_decompressed: usize,
}

/// Active permessage-deflate codec for one connection.
pub struct DeflateExtension {
    settings: NegotiatedDeflate,
    encoder: Option<Compress>,
    decoder: Option<Decompress>,
}

impl DeflateExtension {
    fn new(settings: NegotiatedDeflate) -> Self {
        Self {
            settings,
            encoder: None,
            decoder: None,
        }
    }

    fn encoder(&mut self) -> &mut Compress {
        let settings = &self.settings;
        self.encoder.get_or_insert_with(|| {
            #[cfg(feature = "zlib")]
            {
                Compress::new_with_window_bits(
                    Compression::new(settings.level),
                    false,
                    settings.compress_window,
                )
            }
            #[cfg(not(feature = "zlib"))]
            {
                Compress::new(Compression::new(settings.level), false)
            }
        })
    }

    fn decoder(&mut self) -> &mut Decompress {
        let settings = &self.settings;
        self.decoder.get_or_insert_with(|| {
            #[cfg(feature = "zlib")]
            {
                Decompress::new_with_window_bits(false, settings.decompress_window)
            }
            #[cfg(not(feature = "zlib"))]
            {
                let _ = settings;
                Decompress::new(false)
            }
        })
    }

    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let reset_after = self.settings.reset_compress;
        let encoder = self.encoder();
        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        let mut consumed = 0;

        while consumed < data.len() {
            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = encoder.total_in();
            let before_out = encoder.total_out();

            encoder
                .compress(&data[consumed..], &mut out[old_len..], FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("deflate failed: {}", e)))?;

            let took = (encoder.total_in() - before_in) as usize;
            let made = (encoder.total_out() - before_out) as usize;
            out.truncate(old_len + made);
            consumed += took;

            if took == 0 && made == 0 {
                break;
            }
        }

        // Flush until the sync marker lands in the output.
        while !out.ends_with(&DEFLATE_TRAILER) {
            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);
            let before_out = encoder.total_out();
            encoder
                .compress(&[], &mut out[old_len..], FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("deflate flush failed: {}", e)))?;
            let made = (encoder.total_out() - before_out) as usize;
            out.truncate(old_len + made);
            if made == 0 {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }

        if reset_after {
            encoder.reset();
        }

        Ok(out)
    }

    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let max = self.settings.max_decompressed;
        let reset_after = self.settings.reset_decompress;
        let decoder = self.decoder();
        let mut out = Vec::with_capacity(data.len().min(CHUNK));
        let mut consumed = 0;

        while consumed < input.len() {
            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = decoder.total_in();
            let before_out = decoder.total_out();

            let status = decoder
                .decompress(&input[consumed..], &mut out[old_len..], FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("inflate failed: {}", e)))?;

            let took = (decoder.total_in() - before_in) as usize;
            let made = (decoder.total_out() - before_out) as usize;
            out.truncate(old_len + made);
            consumed += took;

            if out.len() > max {
                return Err(Error::DecompressedTooLarge {
                    size: out.len(),
                    max,
                });
            }

            if status == Status::StreamEnd || (took == 0 && made == 0) {
                break;
            }
        }

        if reset_after {
            decoder.reset(false);
        }

        Ok(out)
    }
}

// The pipeline moves between the reader and writer tasks, so the codec
// state must be Send. Holds for both the miniz_oxide and zlib backends;
// checked at compile time.
const _: () = {
    const fn assert_send<T: Send>() {}
    assert_send::<Compress>();
    assert_send::<Decompress>();
};

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.opcode.is_control() || frame.payload.is_empty() {
            return Ok(());
        }
        frame.payload = self.compress(&frame.payload)?;
        frame.rsv1 = true;
        Ok(())
    }

    fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        if !frame.rsv1 {
            return Ok(());
        }
        if frame.opcode.is_control() {
            return Err(Error::Extension("RSV1 set on control frame".into()));
        }
        frame.payload = self.decompress(&frame.payload)?;
        frame.rsv1 = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.encoder = None;
        self.decoder = None;
    }
}
