//! The fallback-attempt chain: an ordered, packed sequence of tile lookup attempts.
//!
//! Every output pixel is resolved by walking a chain of attempts from the finest primary-source
//! zoom down to coarse alternate-source levels. The whole chain is packed into a single `u64`
//! (at most [`MAX_ATTEMPTS`] slots of 7 bits each) so it can be built once per render session
//! and passed around by value.

use crate::error::TilefallError;
use crate::layer_spec::{LayerSpec, RenderFlags};

/// Maximum number of attempts a chain can hold.
pub const MAX_ATTEMPTS: usize = 9;

const SLOT_WIDTH: u32 = 7;
const ZOOM_MASK: u64 = 0x1F;
const ALTERNATE_BIT: u64 = 1 << 5;
const DOWNLOAD_BIT: u64 = 1 << 6;

/// Download-permission bits of all slots.
const DOWNLOAD_MASK: u64 = {
    let mut mask = 0u64;
    let mut slot = 0;
    while slot < MAX_ATTEMPTS {
        mask |= DOWNLOAD_BIT << (SLOT_WIDTH as usize * slot);
        slot += 1;
    }
    mask
};

/// Silent same-source levels tried below the primary zoom to paper over in-flight gaps.
const SILENT_PRIMARY_STEPS: u8 = 2;
/// How many levels finer than a source's natural zoom (or the target zoom) a download may be.
const DOWNLOAD_FINER_SLACK: u8 = 2;
/// Once the chain has descended more than this below the primary zoom, downloading is disabled
/// for the remainder of the chain.
const DOWNLOAD_ZOOM_DROP: u8 = 5;
/// Levels more than this below the primary zoom are blank-equivalent and end the chain.
const BLANK_ZOOM_DROP: u8 = 7;
/// Largest zoom gap between the primary and target levels that still gets a look-ahead slot.
const SUPERSAMPLE_ZOOM_SLACK: u8 = 5;
/// Where the alternate descent starts when there is no usable alternate source.
const NO_ALTERNATE_ZOOM_CAP: u8 = 2;

/// One tile lookup attempt of a fallback chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Attempt {
    zoom: u8,
    alternate: bool,
    download: bool,
}

impl Attempt {
    /// Creates a new attempt, validating the zoom level.
    pub fn new(zoom: u8, alternate: bool, download: bool) -> Result<Self, TilefallError> {
        if !(1..=31).contains(&zoom) {
            return Err(TilefallError::ZoomOutOfRange(zoom));
        }

        Ok(Self {
            zoom,
            alternate,
            download,
        })
    }

    /// Zoom level of the attempt.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Whether the attempt consults the alternate tile source.
    pub fn uses_alternate(&self) -> bool {
        self.alternate
    }

    /// Whether the attempt is permitted to trigger a new download.
    pub fn may_download(&self) -> bool {
        self.download
    }

    fn encode(&self) -> u64 {
        let mut raw = self.zoom as u64;
        if self.alternate {
            raw |= ALTERNATE_BIT;
        }
        if self.download {
            raw |= DOWNLOAD_BIT;
        }
        raw
    }

    fn decode(raw: u64) -> Option<Self> {
        let zoom = (raw & ZOOM_MASK) as u8;
        if zoom == 0 {
            return None;
        }

        Some(Self {
            zoom,
            alternate: raw & ALTERNATE_BIT != 0,
            download: raw & DOWNLOAD_BIT != 0,
        })
    }
}

/// An ordered sequence of at most [`MAX_ATTEMPTS`] lookup attempts packed into a `u64`.
///
/// A slot with zoom 0 is empty: it is skipped during resolution, not treated as a terminator, so
/// two chains occupying disjoint slots can be interleaved with [`combined`](Self::combined).
#[derive(Default, Copy, Clone, PartialEq, Eq)]
pub struct FallbackChain(u64);

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for slot in 0..MAX_ATTEMPTS {
            match self.slot(slot) {
                Some(attempt) => list.entry(&attempt),
                None => list.entry(&()),
            };
        }
        list.finish()
    }
}

impl FallbackChain {
    /// A chain with no attempts.
    pub const EMPTY: FallbackChain = FallbackChain(0);

    /// Packs the given attempts into a chain, starting at slot 0.
    pub fn from_attempts(attempts: &[Attempt]) -> Result<Self, TilefallError> {
        if attempts.len() > MAX_ATTEMPTS {
            return Err(TilefallError::ChainOverflow {
                max: MAX_ATTEMPTS,
                got: attempts.len(),
            });
        }

        let mut raw = 0;
        for (slot, attempt) in attempts.iter().enumerate() {
            set_slot(&mut raw, slot, *attempt);
        }

        Ok(Self(raw))
    }

    /// The attempt in the given slot, or `None` if the slot is empty or out of range.
    pub fn slot(&self, slot: usize) -> Option<Attempt> {
        if slot >= MAX_ATTEMPTS {
            return None;
        }

        Attempt::decode(self.0 >> (SLOT_WIDTH as usize * slot))
    }

    /// Iterates attempts from slot 0, stopping at the first empty slot.
    pub fn attempts(&self) -> impl Iterator<Item = Attempt> + '_ {
        (0..MAX_ATTEMPTS)
            .map(|slot| self.slot(slot))
            .take_while(Option::is_some)
            .flatten()
    }

    /// Number of non-empty slots.
    pub fn attempt_count(&self) -> usize {
        (0..MAX_ATTEMPTS).filter(|&s| self.slot(s).is_some()).count()
    }

    /// Returns true if the chain holds no attempts at all.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns the same chain with every download-permission bit cleared. Zoom levels,
    /// alternate-source bits and slot order are untouched; the transform is idempotent.
    pub fn without_downloads(&self) -> Self {
        Self(self.0 & !DOWNLOAD_MASK)
    }

    /// Bitwise union of two chains. The caller guarantees the chains occupy disjoint slots;
    /// this is how the look-ahead supersampling slot is interleaved with the ordinary chain.
    pub fn combined(&self, other: FallbackChain) -> Self {
        Self(self.0 | other.0)
    }
}

fn set_slot(raw: &mut u64, slot: usize, attempt: Attempt) {
    *raw |= attempt.encode() << (SLOT_WIDTH as usize * slot);
}

/// The chains one render session resolves pixels through: the ordinary fallback chain and,
/// when look-ahead supersampling applies, a second chain occupying slot 0 only.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChainSet {
    main: FallbackChain,
    supersample: FallbackChain,
}

impl ChainSet {
    /// The ordinary fallback chain.
    pub fn main(&self) -> FallbackChain {
        self.main
    }

    /// The look-only supersampling chain; empty when no look-ahead slot was inserted.
    pub fn supersample(&self) -> FallbackChain {
        self.supersample
    }

    /// The union of the ordinary and supersampling chains, used to resolve supersample lookups.
    pub fn combined(&self) -> FallbackChain {
        self.main.combined(self.supersample)
    }
}

/// Builds the fallback chains for one render session of the given layer.
///
/// `display_pixel_size` is the geographic size of one output pixel. The primary attempt uses the
/// finer of the layer's target zoom and the primary source's natural zoom for that pixel size;
/// fallback attempts descend in zoom from there, first silently on the primary source, then on
/// the alternate source with throttled download permissions.
pub fn build_chains(spec: &LayerSpec, display_pixel_size: f64) -> ChainSet {
    let target = spec.target_zoom();
    let natural_primary = spec.primary().natural_zoom(display_pixel_size);
    let primary_zoom = target.min(natural_primary);

    let oversampling = target - primary_zoom;
    let look_ahead = spec.flags().contains(RenderFlags::SUPERSAMPLE)
        && oversampling >= 1
        && oversampling <= SUPERSAMPLE_ZOOM_SLACK;

    let mut raw = 0u64;
    let mut slot = usize::from(look_ahead);

    set_slot(
        &mut raw,
        slot,
        Attempt {
            zoom: primary_zoom,
            alternate: false,
            download: true,
        },
    );
    slot += 1;

    let mut zoom = primary_zoom;
    for _ in 0..SILENT_PRIMARY_STEPS {
        if zoom <= 1 || slot >= MAX_ATTEMPTS {
            break;
        }

        zoom -= 1;
        set_slot(
            &mut raw,
            slot,
            Attempt {
                zoom,
                alternate: false,
                download: false,
            },
        );
        slot += 1;
    }

    let alternate = spec.alternate();
    let natural_alternate = alternate.natural_zoom(display_pixel_size);
    let cap = if alternate.is_none() {
        NO_ALTERNATE_ZOOM_CAP
    } else {
        31
    };

    let mut zoom = zoom.saturating_sub(1).min(cap);
    let mut downloads_enabled = !alternate.is_none();
    while slot < MAX_ATTEMPTS && zoom >= 1 && primary_zoom - zoom <= BLANK_ZOOM_DROP {
        // The too-coarse latch never re-enables downloads at a coarser level.
        if primary_zoom - zoom > DOWNLOAD_ZOOM_DROP {
            downloads_enabled = false;
        }

        let download = downloads_enabled
            && slot % 2 == 1
            && zoom <= natural_alternate.saturating_add(DOWNLOAD_FINER_SLACK)
            && zoom <= target.saturating_add(DOWNLOAD_FINER_SLACK);

        set_slot(
            &mut raw,
            slot,
            Attempt {
                zoom,
                alternate: true,
                download,
            },
        );
        slot += 1;
        zoom -= 1;
    }

    let supersample = if look_ahead {
        let mut ss = 0u64;
        set_slot(
            &mut ss,
            0,
            Attempt {
                zoom: target,
                alternate: false,
                download: false,
            },
        );
        FallbackChain(ss)
    } else {
        FallbackChain::EMPTY
    };

    ChainSet {
        main: FallbackChain(raw),
        supersample,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::source::TileSource;
    use crate::tests::FlatProjection;

    fn spec(
        target_zoom: u8,
        primary: TileSource,
        alternate: TileSource,
        flags: RenderFlags,
    ) -> LayerSpec {
        LayerSpec::new(
            Arc::new(FlatProjection::new(0.001)),
            target_zoom,
            primary,
            alternate,
            flags,
            || 1000.0,
        )
        .expect("valid spec")
    }

    /// Display pixel size that makes a 256px-tile source natural at the given zoom.
    fn pixel_size_for(zoom: u8) -> f64 {
        1.0 / (256.0 * (1u64 << zoom) as f64)
    }

    fn present(chain: FallbackChain) -> Vec<Attempt> {
        (0..MAX_ATTEMPTS).filter_map(|s| chain.slot(s)).collect()
    }

    #[test]
    fn round_trip() {
        let attempts = vec![
            Attempt::new(31, false, true).expect("valid"),
            Attempt::new(17, true, false).expect("valid"),
            Attempt::new(16, true, true).expect("valid"),
            Attempt::new(1, false, false).expect("valid"),
        ];
        let chain = FallbackChain::from_attempts(&attempts).expect("fits");
        assert_eq!(chain.attempts().collect::<Vec<_>>(), attempts);
        assert_eq!(chain.attempt_count(), 4);
        assert!(chain.slot(4).is_none());
    }

    #[test]
    fn overflow_rejected() {
        let attempts = vec![Attempt::new(5, false, false).expect("valid"); 10];
        assert_matches!(
            FallbackChain::from_attempts(&attempts),
            Err(TilefallError::ChainOverflow { max: 9, got: 10 })
        );
    }

    #[test]
    fn attempt_zoom_is_validated() {
        assert_matches!(
            Attempt::new(0, false, false),
            Err(TilefallError::ZoomOutOfRange(0))
        );
        assert_matches!(
            Attempt::new(32, false, false),
            Err(TilefallError::ZoomOutOfRange(32))
        );
    }

    #[test]
    fn clearing_downloads_is_idempotent_and_order_preserving() {
        let spec = spec(
            10,
            TileSource::new(0, 256),
            TileSource::new(1, 256),
            RenderFlags::NONE,
        );
        let chain = build_chains(&spec, pixel_size_for(10)).main();
        let stripped = chain.without_downloads();

        assert_eq!(stripped, stripped.without_downloads());
        assert!(stripped.attempts().all(|a| !a.may_download()));

        let original = present(chain);
        let after = present(stripped);
        assert_eq!(original.len(), after.len());
        for (a, b) in original.iter().zip(&after) {
            assert_eq!(a.zoom(), b.zoom());
            assert_eq!(a.uses_alternate(), b.uses_alternate());
        }
    }

    #[test]
    fn attempts_descend_strictly_in_zoom() {
        for target in [4u8, 10, 20, 31] {
            let spec = spec(
                target,
                TileSource::new(0, 256),
                TileSource::new(1, 256),
                RenderFlags::NONE,
            );
            let chain = build_chains(&spec, pixel_size_for(target.saturating_sub(2))).main();
            let attempts = present(chain);
            assert!(!attempts.is_empty());
            for pair in attempts.windows(2) {
                assert!(pair[0].zoom() > pair[1].zoom());
            }
        }
    }

    #[test]
    fn primary_attempt_uses_finer_of_target_and_natural() {
        let primary = TileSource::new(0, 256);
        let alternate = TileSource::new(1, 256);

        // Natural zoom 10, target 13: the primary attempt stays at 10.
        let s = spec(13, primary, alternate, RenderFlags::NONE);
        let first = build_chains(&s, pixel_size_for(10))
            .main()
            .attempts()
            .next()
            .expect("chain is not empty");
        assert_eq!(first.zoom(), 10);
        assert!(first.may_download());
        assert!(!first.uses_alternate());

        // Natural zoom 10, target 7: the target wins.
        let s = spec(7, primary, alternate, RenderFlags::NONE);
        let first = build_chains(&s, pixel_size_for(10))
            .main()
            .attempts()
            .next()
            .expect("chain is not empty");
        assert_eq!(first.zoom(), 7);
    }

    #[test]
    fn silent_steps_then_throttled_alternate_descent() {
        let spec = spec(
            10,
            TileSource::new(0, 256),
            TileSource::new(1, 256),
            RenderFlags::NONE,
        );
        let attempts = present(build_chains(&spec, pixel_size_for(10)).main());

        // Primary at 10, two silent primary steps, then alternate levels down to the
        // blank-equivalent cutoff 7 levels below the primary zoom.
        let zooms: Vec<u8> = attempts.iter().map(Attempt::zoom).collect();
        assert_eq!(zooms, vec![10, 9, 8, 7, 6, 5, 4, 3]);

        assert!(attempts[1..3].iter().all(|a| !a.uses_alternate() && !a.may_download()));
        assert!(attempts[3..].iter().all(Attempt::uses_alternate));

        // Downloads only on odd slots, and never after the too-coarse latch trips.
        let downloads: Vec<bool> = attempts.iter().map(Attempt::may_download).collect();
        assert_eq!(downloads, vec![true, false, false, true, false, true, false, false]);
    }

    #[test]
    fn download_disable_is_monotonic() {
        for target in [6u8, 10, 15, 25] {
            let spec = spec(
                target,
                TileSource::new(0, 256),
                TileSource::new(1, 256),
                RenderFlags::NONE,
            );
            let attempts = present(build_chains(&spec, pixel_size_for(target)).main());
            let alternate: Vec<&Attempt> =
                attempts.iter().filter(|a| a.uses_alternate()).collect();
            let last_download = alternate.iter().rposition(|a| a.may_download());
            if let Some(last) = last_download {
                // No re-enabling below the deepest downloading level.
                assert!(alternate[last + 1..].iter().all(|a| !a.may_download()));
            }
        }
    }

    #[test]
    fn missing_alternate_degenerates_the_descent() {
        let spec = spec(
            10,
            TileSource::new(0, 256),
            TileSource::NONE,
            RenderFlags::NONE,
        );
        let attempts = present(build_chains(&spec, pixel_size_for(10)).main());

        // Only the primary attempt and its silent steps survive: the capped alternate range is
        // blank-equivalent at this zoom.
        let zooms: Vec<u8> = attempts.iter().map(Attempt::zoom).collect();
        assert_eq!(zooms, vec![10, 9, 8]);
        assert!(attempts.iter().all(|a| !a.uses_alternate()));

        // At a shallow zoom the degenerate 1..=2 range does appear, but never downloads.
        let spec = self::spec(
            4,
            TileSource::new(0, 256),
            TileSource::NONE,
            RenderFlags::NONE,
        );
        let attempts = present(build_chains(&spec, pixel_size_for(4)).main());
        let alternate: Vec<&Attempt> = attempts.iter().filter(|a| a.uses_alternate()).collect();
        assert!(!alternate.is_empty());
        assert!(alternate.iter().all(|a| a.zoom() <= 2 && !a.may_download()));
    }

    #[test]
    fn look_ahead_slot_is_reserved_for_supersampling() {
        let primary = TileSource::new(0, 256);
        let alternate = TileSource::new(1, 256);

        // Target 3 levels above the natural zoom: slot 0 is reserved.
        let s = spec(13, primary, alternate, RenderFlags::SUPERSAMPLE);
        let chains = build_chains(&s, pixel_size_for(10));
        assert!(chains.main().slot(0).is_none());
        assert_eq!(
            chains.main().slot(1).map(|a| a.zoom()),
            Some(10),
        );

        let look = chains.supersample().slot(0).expect("look-ahead slot");
        assert_eq!(look.zoom(), 13);
        assert!(!look.may_download());
        assert!(!look.uses_alternate());

        // The union interleaves the two chains.
        let combined = chains.combined();
        assert_eq!(combined.slot(0), Some(look));
        assert_eq!(combined.slot(1), chains.main().slot(1));

        // Too large a gap, or no gap at all, and no slot is reserved.
        for (target, natural) in [(16u8, 10u8), (10, 10)] {
            let s = spec(target, primary, alternate, RenderFlags::SUPERSAMPLE);
            let chains = build_chains(&s, pixel_size_for(natural));
            assert!(chains.supersample().is_empty());
            assert!(chains.main().slot(0).is_some());
        }
    }
}
