use core::fmt;
use std::{collections::HashMap, hash::Hash, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::StationError,
    store::{self, Store},
};

/// Sentinel id of the synthesized alarm tone. It always resolves.
pub const CLASSIC_STATION_ID: &str = "classic";
/// other spellings of the tone id that older records may carry
const CLASSIC_ALIASES: [&str; 2] = ["classic_beep", "built-in-beep"];

pub const STATIONS_KEY: &str = "stations";

/// What a station plays, with only the fields that kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StationSource {
    Tone,
    Stream { url: String },
    File { path: PathBuf },
}

impl StationSource {
    /// `http(s)://` locators become streams, anything else a local file path.
    pub fn from_locator(locator: &str) -> Result<Self, StationError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(StationError::EmptyLocator);
        }
        if locator.contains("://") {
            let url = reqwest::Url::parse(locator)
                .map_err(|_| StationError::InvalidUrl(locator.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(StationError::InvalidUrl(locator.to_string()));
            }
            return Ok(Self::Stream {
                url: url.to_string(),
            });
        }
        Ok(Self::File {
            path: PathBuf::from(locator),
        })
    }

    fn validate(&self) -> Result<(), StationError> {
        match self {
            Self::Tone => Ok(()),
            Self::Stream { url } => Self::from_locator(url).and_then(|parsed| match parsed {
                Self::Stream { .. } => Ok(()),
                _ => Err(StationError::InvalidUrl(url.clone())),
            }),
            Self::File { path } if path.as_os_str().is_empty() => Err(StationError::EmptyLocator),
            Self::File { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub source: StationSource,
    #[serde(default)]
    pub built_in: bool,
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            StationSource::Tone => write!(f, "{} [{}]", self.name, self.id),
            StationSource::Stream { url } => write!(f, "{} [{}] {url}", self.name, self.id),
            StationSource::File { path } => {
                write!(f, "{} [{}] {}", self.name, self.id, path.display())
            }
        }
    }
}

impl Station {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: StationSource) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source,
            built_in: false,
        }
    }

    #[must_use]
    pub fn classic() -> Self {
        Self {
            id: CLASSIC_STATION_ID.to_string(),
            name: "Classic Alarm Sound".to_string(),
            source: StationSource::Tone,
            built_in: true,
        }
    }

    fn radio(id: &str, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            source: StationSource::Stream {
                url: url.to_string(),
            },
            built_in: true,
        }
    }

    /// The fixed seed list shipped with the app.
    #[must_use]
    pub fn built_in() -> Vec<Self> {
        vec![
            Self::classic(),
            Self::radio(
                "bbc-radio-1",
                "BBC Radio 1",
                "https://stream.live.vc.bbcmedia.co.uk/bbc_radio_one",
            ),
            Self::radio("npr", "NPR (USA)", "https://npr-ice.streamguys1.com/live.mp3"),
            Self::radio(
                "nts-1",
                "NTS Radio 1 (London)",
                "https://stream-relay-geo.ntslive.net/stream",
            ),
            Self::radio(
                "nts-2",
                "NTS Radio 2 (London)",
                "https://stream-relay-geo.ntslive.net/stream2",
            ),
            Self::radio(
                "rinse-france",
                "Rinse France (Paris)",
                "https://rinse.fr/player/french_pls.php",
            ),
            Self::radio(
                "fip",
                "FIP Radio (Paris)",
                "https://icecast.radiofrance.fr/fip-midfi.mp3",
            ),
            Self::radio("europa-plus", "Европа Плюс", "http://ep128.hostingradio.ru:8030/ep128"),
            Self::radio(
                "energy",
                "Radio Energy",
                "https://pub0302.101.ru:8443/stream/air/aac/64/99",
            ),
            Self::radio("love-radio", "Love Radio", "http://nashe1.hostingradio.ru/love-128.mp3"),
            Self::radio("hit-fm", "Hit FM", "http://online.hitfm.ru/hitfm"),
            Self::radio(
                "monte-carlo",
                "Monte Carlo",
                "https://montecarlo.hostingradio.ru/montecarlo96.aacp",
            ),
            Self::radio("studio-21", "STUDIO 21", "http://studio21.ru:8001/radio128"),
            Self::radio("metro", "Радио МЕТРО", "http://stream.m-1.fm/radioMetro/aacp64"),
            Self::radio(
                "hermitage",
                "Эрмитаж FM 90.1",
                "https://icecast-hermitage.cdnvideo.ru/hermitage_aac",
            ),
        ]
    }
}

pub trait GetId<T> {
    fn get_id(&self) -> &T;
}

impl GetId<String> for Station {
    fn get_id(&self) -> &String {
        &self.id
    }
}

/// Records keyed by their own id, written to disk as a plain list.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(from = "Vec<V>", into = "Vec<V>")]
pub struct Collection<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: GetId<K> + Clone,
{
    pub data: HashMap<K, V>,
}

impl<K, V> Default for Collection<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: GetId<K> + Clone,
{
    fn default() -> Self {
        Self {
            data: HashMap::new(),
        }
    }
}

impl<K, V> Collection<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: GetId<K> + Clone,
{
    pub fn insert(&mut self, item: V) -> Option<V> {
        let id = item.get_id().to_owned();
        self.data.insert(id, item)
    }
}

impl<K, V> From<Vec<V>> for Collection<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: GetId<K> + Clone,
{
    /// later duplicates replace earlier ones
    fn from(items: Vec<V>) -> Self {
        let data = items
            .into_iter()
            .map(|item| (item.get_id().clone(), item))
            .collect();
        Self { data }
    }
}

/// Sorted by id so saving the same stations twice writes the same file.
impl<K, V> From<Collection<K, V>> for Vec<V>
where
    K: Eq + Hash + Clone + Ord,
    V: GetId<K> + Clone,
{
    fn from(collection: Collection<K, V>) -> Self {
        let mut entries: Vec<(K, V)> = collection.data.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, item)| item).collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct CustomStations {
    #[serde(default)]
    stations: Collection<String, Station>,
}

/// Built-in seed list plus the user's own stations.
///
/// Every mutation writes the full custom list back to the store. A failed
/// write is logged and the in-memory change is kept.
pub struct StationRegistry {
    built_in: Vec<Station>,
    custom: Collection<String, Station>,
    store: Box<dyn Store>,
}

impl fmt::Debug for StationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationRegistry")
            .field("built_in", &self.built_in.len())
            .field("custom", &self.custom.data.len())
            .finish_non_exhaustive()
    }
}

impl StationRegistry {
    #[must_use]
    pub fn load(store: Box<dyn Store>) -> Self {
        let built_in = Station::built_in();
        let custom = read_custom(store.as_ref(), &built_in);
        Self {
            built_in,
            custom,
            store,
        }
    }

    /// Re-reads the custom list so stations another process stored become
    /// playable. Returns true if it changed.
    pub fn sync(&mut self) -> bool {
        let stored = read_custom(self.store.as_ref(), &self.built_in);
        if stored.data == self.custom.data {
            return false;
        }
        log::info!(
            "custom stations were changed elsewhere, {} now",
            stored.data.len()
        );
        self.custom = stored;
        true
    }

    /// Looks a station up in the combined registry. The tone aliases map onto
    /// the classic station.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&Station> {
        let id = if CLASSIC_ALIASES.contains(&id) {
            CLASSIC_STATION_ID
        } else {
            id
        };
        self.built_in
            .iter()
            .find(|station| station.id == id)
            .or_else(|| self.custom.data.get(id))
    }

    /// built-in stations in seed order, then custom ones sorted by name
    #[must_use]
    pub fn all(&self) -> Vec<&Station> {
        let mut custom: Vec<&Station> = self.custom.data.values().collect();
        custom.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        self.built_in.iter().chain(custom).collect()
    }

    pub fn add(&mut self, mut station: Station) -> Result<(), StationError> {
        station.id = station.id.trim().to_string();
        if station.id.is_empty() {
            return Err(StationError::EmptyId);
        }
        station.source.validate()?;
        if self.resolve(&station.id).is_some() {
            return Err(StationError::DuplicateId(station.id));
        }
        station.built_in = false;
        log::info!("adding station {station}");
        self.custom.insert(station);
        self.save();
        Ok(())
    }

    pub fn update(&mut self, mut station: Station) -> Result<(), StationError> {
        if self.is_built_in(&station.id) {
            return Err(StationError::BuiltInImmutable(station.id));
        }
        if !self.custom.data.contains_key(&station.id) {
            return Err(StationError::UnknownId(station.id));
        }
        station.source.validate()?;
        station.built_in = false;
        log::info!("updating station {station}");
        self.custom.insert(station);
        self.save();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Station, StationError> {
        if self.is_built_in(id) {
            return Err(StationError::BuiltInImmutable(id.to_string()));
        }
        let removed = self
            .custom
            .data
            .remove(id)
            .ok_or_else(|| StationError::UnknownId(id.to_string()))?;
        log::info!("removed station {removed}");
        self.save();
        Ok(removed)
    }

    fn is_built_in(&self, id: &str) -> bool {
        CLASSIC_ALIASES.contains(&id) || self.built_in.iter().any(|station| station.id == id)
    }

    fn save(&mut self) {
        let snapshot = CustomStations {
            stations: self.custom.clone(),
        };
        if let Err(e) = store::save(self.store.as_mut(), STATIONS_KEY, &snapshot) {
            log::error!("couldn't save custom stations: {e}");
        }
    }
}

fn read_custom(store: &dyn Store, built_in: &[Station]) -> Collection<String, Station> {
    let mut custom = store::load::<CustomStations>(store, STATIONS_KEY)
        .unwrap_or_default()
        .stations;
    // a custom record can never shadow a built-in one
    custom
        .data
        .retain(|id, _| !built_in.iter().any(|station| &station.id == id));
    for station in custom.data.values_mut() {
        station.built_in = false;
    }
    custom
}
