//! Driver discovery and session-factory assembly.
//!
//! A node advertises one slot group per capability stereotype; each group
//! holds independent [`SessionFactory`] instances, one per allowed
//! concurrent session, so concurrent use needs no runtime bookkeeping
//! inside a factory.
//!
//! Factories are merged from four sources, in precedence order:
//!
//! 1. config-declared factory providers (provider name + stereotype JSON)
//! 2. config-declared driver slots (`key=value` triples)
//! 3. allow-listed detected drivers (requires detection enabled)
//! 4. fully auto-detected drivers
//!
//! Any malformed entry aborts the whole pass with a configuration error: a
//! partial slot table would silently under-provision the node.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use sgrid_protocol::Capabilities;

use crate::error::{Error, Result};
use crate::options::NodeOptions;

/// A live automated-browser session produced by a factory.
///
/// Deliberately minimal: the grid core routes sessions, it does not drive
/// them.
pub trait SessionHandle: Send {
    /// The capabilities the session was created with.
    fn capabilities(&self) -> &Capabilities;
}

/// A unit able to instantiate exactly one session for given capabilities.
pub trait SessionFactory: Send + Sync {
    fn create(&self, capabilities: &Capabilities) -> Result<Box<dyn SessionHandle>>;
}

/// Node-level descriptor of an installed driver.
pub trait DriverInfo: Send + Sync {
    fn display_name(&self) -> &str;
    /// The capabilities this driver advertises for distribution.
    fn canonical_capabilities(&self) -> Capabilities;
    /// Upper bound on concurrent sessions the driver itself tolerates.
    fn max_simultaneous_sessions(&self) -> usize;
    /// Whether the driver binary is actually usable on this host.
    fn is_available(&self) -> bool;
    /// Whether this driver can realize the given capabilities. This is the
    /// canonical matching predicate; callers never compare capability maps
    /// naively.
    fn is_supporting(&self, capabilities: &Capabilities) -> bool;
}

/// Scores how well a service builder can back a capability set.
///
/// A positive score means the builder can produce session factories for
/// those capabilities; several scorers may score positively for the same
/// stereotype and each contributes its own slots.
pub trait DriverScorer: Send + Sync {
    fn score(&self, capabilities: &Capabilities) -> u32;
}

/// Produces factories for a stereotype, one call per concurrency slot.
pub type FactoryFactory<'a> = dyn Fn(&Capabilities) -> Vec<Arc<dyn SessionFactory>> + 'a;

/// Named constructor for config-declared factories: takes the raw config
/// blob and the stereotype, returns a factory. The registry lookup replaces
/// the reflective entry-point search other grid implementations use.
pub type FactoryProvider =
    Arc<dyn Fn(&str, &Capabilities) -> Result<Arc<dyn SessionFactory>> + Send + Sync>;

/// Everything a node knows about its drivers, scorers, and named factory
/// providers. Populated at startup by the embedding process.
#[derive(Default)]
pub struct DriverRegistry {
    infos: Vec<Arc<dyn DriverInfo>>,
    scorers: Vec<Arc<dyn DriverScorer>>,
    factory_providers: HashMap<String, FactoryProvider>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_info(&mut self, info: Arc<dyn DriverInfo>) -> &mut Self {
        self.infos.push(info);
        self
    }

    pub fn register_scorer(&mut self, scorer: Arc<dyn DriverScorer>) -> &mut Self {
        self.scorers.push(scorer);
        self
    }

    pub fn register_factory_provider(
        &mut self,
        name: impl Into<String>,
        provider: FactoryProvider,
    ) -> &mut Self {
        self.factory_providers.insert(name.into(), provider);
        self
    }
}

/// One advertised stereotype and its independently-invocable factories.
pub struct SlotGroup {
    pub stereotype: Capabilities,
    pub factories: Vec<Arc<dyn SessionFactory>>,
}

impl std::fmt::Debug for SlotGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGroup")
            .field("stereotype", &self.stereotype)
            .field("factories", &self.factories.len())
            .finish()
    }
}

/// Assembles the node's `Capabilities -> factories` table.
///
/// Fail-fast: the first configuration error aborts discovery entirely.
pub fn build_session_factories(
    options: &NodeOptions,
    registry: &DriverRegistry,
    factory_factory: &FactoryFactory<'_>,
) -> Result<Vec<SlotGroup>> {
    let max_sessions = options.max_sessions();
    let detected = discover_drivers(options, registry, max_sessions, factory_factory);

    let mut groups: Vec<SlotGroup> = Vec::new();

    add_factories_from_config(options, registry, &mut groups)?;
    add_driver_configs(options, registry, factory_factory, &mut groups)?;
    add_specific_drivers(options, &detected, &mut groups)?;
    add_detected_drivers(options, &detected, &mut groups);

    Ok(groups)
}

struct DetectedDriver {
    info: Arc<dyn DriverInfo>,
    factories: Vec<Arc<dyn SessionFactory>>,
}

/// Auto-detection pass: every available driver, sorted by display name for
/// determinism, with `min(driver max, node max)` factory instances per
/// positively-scoring builder.
fn discover_drivers(
    options: &NodeOptions,
    registry: &DriverRegistry,
    max_sessions: usize,
    factory_factory: &FactoryFactory<'_>,
) -> Vec<DetectedDriver> {
    if !options.detect_drivers {
        return Vec::new();
    }

    let mut infos: Vec<&Arc<dyn DriverInfo>> = registry
        .infos
        .iter()
        .filter(|info| info.is_available())
        .collect();
    infos.sort_by_key(|info| info.display_name().to_lowercase());

    infos
        .into_iter()
        .filter_map(|info| {
            let caps = info.canonical_capabilities();
            let slots = info.max_simultaneous_sessions().min(max_sessions);
            let mut factories = Vec::new();
            for scorer in &registry.scorers {
                if scorer.score(&caps) == 0 {
                    continue;
                }
                for _ in 0..slots {
                    factories.extend(factory_factory(&caps));
                }
            }
            // A driver no builder can back advertises nothing.
            if factories.is_empty() {
                return None;
            }
            Some(DetectedDriver {
                info: info.clone(),
                factories,
            })
        })
        .collect()
}

/// Source 1: explicit provider/stereotype pairs from config.
fn add_factories_from_config(
    options: &NodeOptions,
    registry: &DriverRegistry,
    groups: &mut Vec<SlotGroup>,
) -> Result<()> {
    let entries = &options.driver_factories;
    if entries.is_empty() {
        return Ok(());
    }
    if entries.len() % 2 != 0 {
        return Err(Error::Configuration(
            "expected each driver factory to be mapped to a config".to_string(),
        ));
    }

    for pair in entries.chunks(2) {
        let (name, blob) = (&pair[0], &pair[1]);
        let stereotype = parse_stereotype(blob)?;
        let provider = registry.factory_providers.get(name).ok_or_else(|| {
            Error::Configuration(format!("unable to find factory provider: {name}"))
        })?;
        let factory = provider(blob, &stereotype)?;
        push_factories(groups, stereotype, vec![factory]);
    }
    Ok(())
}

/// Source 2: `key=value` triples declaring named driver slots.
fn add_driver_configs(
    options: &NodeOptions,
    registry: &DriverRegistry,
    factory_factory: &FactoryFactory<'_>,
    groups: &mut Vec<SlotGroup>,
) -> Result<()> {
    let tokens = &options.driver_configuration;
    if tokens.is_empty() {
        return Ok(());
    }
    if tokens.len() % 3 != 0 {
        return Err(Error::Configuration(
            "expected each driver config to have three elements (name, stereotype and max-sessions)"
                .to_string(),
        ));
    }
    if let Some(bad) = tokens.iter().find(|token| !token.contains('=')) {
        warn!(target = "sgrid.node", token = %bad, "driver config entry is not key=value");
        return Err(Error::Configuration(
            "one or more driver configs does not have the required 'key=value' structure"
                .to_string(),
        ));
    }

    for chunk in tokens.chunks(3) {
        let mut entries = HashMap::new();
        for token in chunk {
            let (key, value) = token.split_once('=').expect("checked above");
            entries.insert(key.to_string(), value.to_string());
        }

        let Some(raw_stereotype) = entries.get("stereotype") else {
            return Err(Error::Configuration(format!(
                "driver config is missing stereotype value: {chunk:?}"
            )));
        };
        let stereotype = parse_stereotype(raw_stereotype)?;
        let display_name = entries
            .get("name")
            .cloned()
            .unwrap_or_else(|| "Custom Slot Config".to_string());
        let declared_max: usize = entries
            .get("max-sessions")
            .map(|raw| {
                raw.parse().map_err(|_| {
                    Error::Configuration(format!("driver max-sessions is not a number: {raw}"))
                })
            })
            .transpose()?
            .unwrap_or(1);
        if declared_max == 0 {
            return Err(Error::Configuration(
                "driver max-sessions must be positive".to_string(),
            ));
        }

        let info = registry
            .infos
            .iter()
            .find(|info| info.is_supporting(&stereotype))
            .ok_or_else(|| {
                Error::Configuration(format!("unable to find matching driver for {stereotype}"))
            })?;

        // External callers see only the operator-declared identity; the
        // detected driver still judges feasibility and availability.
        let configured = ConfiguredDriverInfo {
            inner: info.clone(),
            display_name,
            stereotype: stereotype.clone(),
        };

        let slots = configured.max_simultaneous_sessions().min(declared_max);
        let mut factories = Vec::new();
        for scorer in &registry.scorers {
            if scorer.score(&stereotype) == 0 {
                continue;
            }
            for _ in 0..slots {
                factories.extend(factory_factory(&stereotype));
            }
        }

        report(
            configured.display_name(),
            &configured.canonical_capabilities(),
            factories.len(),
        );
        push_factories(groups, configured.canonical_capabilities(), factories);
    }
    Ok(())
}

/// Source 3: detected drivers filtered by the explicit allow-list.
fn add_specific_drivers(
    options: &NodeOptions,
    detected: &[DetectedDriver],
    groups: &mut Vec<SlotGroup>,
) -> Result<()> {
    if !options.detect_drivers && options.drivers.is_some() {
        let message = "specific drivers cannot be added if 'detect-drivers' is set to false";
        warn!(target = "sgrid.node", "{message}");
        return Err(Error::Configuration(message.to_string()));
    }

    let Some(list) = &options.drivers else {
        return Ok(());
    };
    let wanted: Vec<String> = list.iter().map(|name| name.to_lowercase()).collect();

    let mut matched: Vec<&DetectedDriver> = detected
        .iter()
        .filter(|driver| wanted.contains(&driver.info.display_name().to_lowercase()))
        .collect();
    matched.sort_by_key(|driver| driver.info.display_name().to_lowercase());

    for driver in matched {
        report(
            driver.info.display_name(),
            &driver.info.canonical_capabilities(),
            driver.factories.len(),
        );
        push_factories(
            groups,
            driver.info.canonical_capabilities(),
            driver.factories.clone(),
        );
    }
    Ok(())
}

/// Source 4: every detected driver, unless an allow-list narrowed the set.
fn add_detected_drivers(
    options: &NodeOptions,
    detected: &[DetectedDriver],
    groups: &mut Vec<SlotGroup>,
) {
    if !options.detect_drivers || options.drivers.is_some() {
        return;
    }

    for driver in detected {
        report(
            driver.info.display_name(),
            &driver.info.canonical_capabilities(),
            driver.factories.len(),
        );
        push_factories(
            groups,
            driver.info.canonical_capabilities(),
            driver.factories.clone(),
        );
    }
}

fn parse_stereotype(raw: &str) -> Result<Capabilities> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|err| Error::Configuration(format!("stereotype is not valid JSON: {err}")))?;
    Capabilities::from_value(&value)
        .ok_or_else(|| Error::Configuration(format!("stereotype is not a JSON object: {raw}")))
}

fn push_factories(
    groups: &mut Vec<SlotGroup>,
    stereotype: Capabilities,
    factories: Vec<Arc<dyn SessionFactory>>,
) {
    if let Some(group) = groups.iter_mut().find(|group| group.stereotype == stereotype) {
        group.factories.extend(factories);
    } else {
        groups.push(SlotGroup {
            stereotype,
            factories,
        });
    }
}

fn report(display_name: &str, capabilities: &Capabilities, count: usize) {
    info!(
        target = "sgrid.node",
        driver = display_name,
        capabilities = %capabilities,
        count,
        "adding driver slots"
    );
}

/// A detected driver re-badged under an operator-declared name and
/// stereotype.
struct ConfiguredDriverInfo {
    inner: Arc<dyn DriverInfo>,
    display_name: String,
    stereotype: Capabilities,
}

impl DriverInfo for ConfiguredDriverInfo {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn canonical_capabilities(&self) -> Capabilities {
        self.stereotype.clone()
    }

    fn max_simultaneous_sessions(&self) -> usize {
        self.inner.max_simultaneous_sessions()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn is_supporting(&self, capabilities: &Capabilities) -> bool {
        self.inner.is_supporting(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubHandle {
        capabilities: Capabilities,
    }

    impl SessionHandle for StubHandle {
        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }
    }

    struct StubFactory;

    impl SessionFactory for StubFactory {
        fn create(&self, capabilities: &Capabilities) -> Result<Box<dyn SessionHandle>> {
            Ok(Box::new(StubHandle {
                capabilities: capabilities.clone(),
            }))
        }
    }

    struct StubDriver {
        name: &'static str,
        browser: &'static str,
        max_sessions: usize,
        available: bool,
    }

    impl DriverInfo for StubDriver {
        fn display_name(&self) -> &str {
            self.name
        }

        fn canonical_capabilities(&self) -> Capabilities {
            Capabilities::from_value(&json!({"browserName": self.browser})).unwrap()
        }

        fn max_simultaneous_sessions(&self) -> usize {
            self.max_sessions
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn is_supporting(&self, capabilities: &Capabilities) -> bool {
            capabilities.browser_name() == Some(self.browser)
        }
    }

    struct BrowserScorer {
        browser: &'static str,
        score: u32,
    }

    impl DriverScorer for BrowserScorer {
        fn score(&self, capabilities: &Capabilities) -> u32 {
            if capabilities.browser_name() == Some(self.browser) {
                self.score
            } else {
                0
            }
        }
    }

    fn caps(browser: &str) -> Capabilities {
        Capabilities::from_value(&json!({"browserName": browser})).unwrap()
    }

    fn one_factory_per_call(capabilities: &Capabilities) -> Vec<Arc<dyn SessionFactory>> {
        let _ = capabilities;
        vec![Arc::new(StubFactory)]
    }

    fn registry_with(
        drivers: Vec<StubDriver>,
        scorers: Vec<BrowserScorer>,
    ) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        for driver in drivers {
            registry.register_info(Arc::new(driver));
        }
        for scorer in scorers {
            registry.register_scorer(Arc::new(scorer));
        }
        registry
    }

    #[test]
    fn configured_slot_count_is_min_of_driver_and_declared_max() {
        let registry = registry_with(
            vec![StubDriver {
                name: "firefox",
                browser: "firefox",
                max_sessions: 3,
                available: true,
            }],
            vec![BrowserScorer {
                browser: "firefox",
                score: 2,
            }],
        );
        let options = NodeOptions {
            detect_drivers: false,
            driver_configuration: vec![
                "name=Firefox Beta".to_string(),
                r#"stereotype={"browserName": "firefox"}"#.to_string(),
                "max-sessions=2".to_string(),
            ],
            ..Default::default()
        };

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].stereotype, caps("firefox"));
        assert_eq!(groups[0].factories.len(), 2);
    }

    #[test]
    fn unmatched_stereotype_is_a_configuration_error() {
        let registry = registry_with(
            vec![StubDriver {
                name: "firefox",
                browser: "firefox",
                max_sessions: 3,
                available: true,
            }],
            vec![BrowserScorer {
                browser: "safari",
                score: 1,
            }],
        );
        let options = NodeOptions {
            detect_drivers: false,
            driver_configuration: vec![
                "name=Safari".to_string(),
                r#"stereotype={"browserName": "safari"}"#.to_string(),
                "max-sessions=1".to_string(),
            ],
            ..Default::default()
        };

        let err = build_session_factories(&options, &registry, &one_factory_per_call)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("matching driver"));
    }

    #[test]
    fn allow_list_with_detection_disabled_is_rejected_before_any_factory() {
        let registry = registry_with(
            vec![StubDriver {
                name: "chrome",
                browser: "chrome",
                max_sessions: 4,
                available: true,
            }],
            vec![BrowserScorer {
                browser: "chrome",
                score: 1,
            }],
        );
        let options = NodeOptions {
            detect_drivers: false,
            drivers: Some(vec!["chrome".to_string()]),
            ..Default::default()
        };

        let err = build_session_factories(&options, &registry, &one_factory_per_call)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn detection_disabled_without_allow_list_yields_no_drivers() {
        let registry = registry_with(
            vec![StubDriver {
                name: "chrome",
                browser: "chrome",
                max_sessions: 4,
                available: true,
            }],
            vec![BrowserScorer {
                browser: "chrome",
                score: 1,
            }],
        );
        let options = NodeOptions {
            detect_drivers: false,
            ..Default::default()
        };

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn allow_list_filters_and_sorts_detected_drivers() {
        let registry = registry_with(
            vec![
                StubDriver {
                    name: "WebKit",
                    browser: "webkit",
                    max_sessions: 1,
                    available: true,
                },
                StubDriver {
                    name: "Chrome",
                    browser: "chrome",
                    max_sessions: 1,
                    available: true,
                },
                StubDriver {
                    name: "Firefox",
                    browser: "firefox",
                    max_sessions: 1,
                    available: true,
                },
            ],
            vec![
                BrowserScorer {
                    browser: "webkit",
                    score: 1,
                },
                BrowserScorer {
                    browser: "chrome",
                    score: 1,
                },
                BrowserScorer {
                    browser: "firefox",
                    score: 1,
                },
            ],
        );
        let options = NodeOptions {
            drivers: Some(vec!["WEBKIT".to_string(), "chrome".to_string()]),
            ..Default::default()
        };

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();

        // Case-insensitive match, firefox excluded, deterministic order.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].stereotype, caps("chrome"));
        assert_eq!(groups[1].stereotype, caps("webkit"));
    }

    #[test]
    fn detection_adds_every_available_driver_capped_by_node_max() {
        let registry = registry_with(
            vec![
                StubDriver {
                    name: "Chrome",
                    browser: "chrome",
                    max_sessions: 64,
                    available: true,
                },
                StubDriver {
                    name: "Broken",
                    browser: "broken",
                    max_sessions: 4,
                    available: false,
                },
            ],
            vec![BrowserScorer {
                browser: "chrome",
                score: 1,
            }],
        );
        let options = NodeOptions {
            max_concurrent_sessions: Some(2),
            ..Default::default()
        };

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].stereotype, caps("chrome"));
        assert_eq!(groups[0].factories.len(), 2);
    }

    #[test]
    fn zero_scoring_builders_contribute_nothing() {
        let registry = registry_with(
            vec![StubDriver {
                name: "Chrome",
                browser: "chrome",
                max_sessions: 2,
                available: true,
            }],
            vec![BrowserScorer {
                browser: "firefox",
                score: 3,
            }],
        );
        let options = NodeOptions::default();

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn odd_factory_pair_count_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let options = NodeOptions {
            driver_factories: vec!["my.provider".to_string()],
            ..Default::default()
        };

        let err = build_session_factories(&options, &registry, &one_factory_per_call)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn factory_providers_are_looked_up_by_name() {
        let mut registry = DriverRegistry::new();
        registry.register_factory_provider(
            "custom.provider",
            Arc::new(|_blob, _stereotype| Ok(Arc::new(StubFactory) as Arc<dyn SessionFactory>)),
        );
        let options = NodeOptions {
            detect_drivers: false,
            driver_factories: vec![
                "custom.provider".to_string(),
                r#"{"browserName": "chrome"}"#.to_string(),
            ],
            ..Default::default()
        };

        let groups =
            build_session_factories(&options, &registry, &one_factory_per_call).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].factories.len(), 1);

        let session = groups[0].factories[0].create(&caps("chrome")).unwrap();
        assert_eq!(session.capabilities().browser_name(), Some("chrome"));
    }

    #[test]
    fn unknown_factory_provider_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let options = NodeOptions {
            driver_factories: vec![
                "missing.provider".to_string(),
                r#"{"browserName": "chrome"}"#.to_string(),
            ],
            ..Default::default()
        };

        let err = build_session_factories(&options, &registry, &one_factory_per_call)
            .unwrap_err();
        assert!(err.to_string().contains("missing.provider"));
    }

    #[test]
    fn malformed_triple_token_is_a_configuration_error() {
        let registry = DriverRegistry::new();
        let options = NodeOptions {
            driver_configuration: vec![
                "name=Ok".to_string(),
                "stereotype-without-equals".to_string(),
                "max-sessions=1".to_string(),
            ],
            ..Default::default()
        };

        let err = build_session_factories(&options, &registry, &one_factory_per_call)
            .unwrap_err();
        assert!(err.to_string().contains("key=value"));
    }
}
