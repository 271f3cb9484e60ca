//! Storage partition resolution.
//!
//! A guest's storage partition is derived once, from the `partitionId` creation
//! parameter. The partition is then encoded into a *site URL* of the form
//! `guest://{domain}/{persist}?{name}`, which is what decides the isolation boundary
//! (site instance) the guest lives in. Two guests created by the same owner with the
//! same partition end up with the same site URL and can therefore script each other.

use crate::guestview::errors::GuestViewError;
use crate::guestview::params::{ParamBag, PARAM_PARTITION_ID};
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

/// Prefix that marks a partition as persistent (stored on disk).
pub const PERSIST_PREFIX: &str = "persist:";

const PERSIST_PATH: &str = "persist";

/// Partition identifier and persistence flag as requested by the embedder.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ResolvedPartition {
    pub id: String,
    pub persistent: bool,
}

/// Full description of a guest's storage partition.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Domain of the partition; the owner's host (or `{owner}guest`)
    pub domain: String,
    /// User supplied partition name (without `persist:` prefix)
    pub name: String,
    /// Persistent (on-disk) vs in-memory storage
    pub persistent: bool,
}

impl PartitionDescriptor {
    pub fn new(domain: impl Into<String>, name: impl Into<String>, persistent: bool) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            persistent,
        }
    }

    /// Partition id as it would be passed in creation parameters again, used when a
    /// guest spawns a sibling window under the same partition.
    pub fn storage_partition_id(&self) -> String {
        if self.persistent {
            format!("{PERSIST_PREFIX}{}", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        !self.persistent
    }
}

/// Parses the partition parameter from a creation bag.
///
/// A missing parameter resolves to the default (unnamed, in-memory) partition. A
/// `persist:` prefix without a name is not a usable persistent partition and also
/// resolves to the default partition. Text that is not valid UTF-8 is a protocol
/// violation and yields [`GuestViewError::InvalidEncoding`].
pub fn resolve_partition(params: &ParamBag) -> Result<ResolvedPartition, GuestViewError> {
    let raw = match params.get_str(PARAM_PARTITION_ID) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(ResolvedPartition::default()),
        Err(_) => return Err(GuestViewError::InvalidEncoding),
    };

    // The prefix is ASCII, so stripping it can never split a multibyte codepoint.
    match raw.strip_prefix(PERSIST_PREFIX) {
        Some("") => {
            log::warn!("Partition '{}' has no name, using the default partition", raw);
            Ok(ResolvedPartition::default())
        }
        Some(name) => Ok(ResolvedPartition {
            id: name.to_string(),
            persistent: true,
        }),
        None => Ok(ResolvedPartition {
            id: raw.to_string(),
            persistent: false,
        }),
    }
}

/// Domain under which the partitions of an owner live. Owners without a host (for
/// instance `data:` documents) fall back to `{owner_id}guest`.
pub fn partition_domain(owner_url: &Url, owner_id: &str) -> String {
    match owner_url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => format!("{owner_id}guest"),
    }
}

/// Encodes a partition into its site URL: `{scheme}://{domain}/{persist}?{name}`.
///
/// Domain and name are form-urlencoded, so owner ids that are not valid host text
/// (spaces, non-ASCII) still give a usable site.
pub fn encode_site(scheme: &str, partition: &PartitionDescriptor) -> Result<Url, GuestViewError> {
    let path = if partition.persistent { PERSIST_PATH } else { "" };
    let domain: String = form_urlencoded::byte_serialize(partition.domain.as_bytes()).collect();
    let mut site = Url::parse(&format!("{}://{}/{}", scheme, domain, path))
        .map_err(|e| GuestViewError::InvalidSite(format!("{}: {}", partition.domain, e)))?;

    let name: String = form_urlencoded::byte_serialize(partition.name.as_bytes()).collect();
    site.set_query(Some(&name));

    Ok(site)
}

/// Decodes a site URL produced by [`encode_site`] back into its partition.
pub fn decode_site(scheme: &str, site: &Url) -> Result<PartitionDescriptor, GuestViewError> {
    if site.scheme() != scheme {
        return Err(GuestViewError::InvalidSite(site.to_string()));
    }

    let domain = match site.host_str() {
        Some(host) if !host.is_empty() => form_urlencoded::parse(host.as_bytes())
            .next()
            .map(|(k, _)| k.into_owned())
            .unwrap_or_default(),
        _ => return Err(GuestViewError::InvalidSite(site.to_string())),
    };

    let persistent = site.path() == format!("/{PERSIST_PATH}");

    let name = form_urlencoded::parse(site.query().unwrap_or("").as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default();

    Ok(PartitionDescriptor {
        domain,
        name,
        persistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestview::config::DEFAULT_GUEST_SCHEME;

    fn bag(partition: &str) -> ParamBag {
        ParamBag::new().with(PARAM_PARTITION_ID, partition)
    }

    #[test]
    fn persist_prefix_selects_persistent_storage() {
        for name in ["work", "a", "persist:", "with space", "ünïcödé", "x:y"] {
            let res = resolve_partition(&bag(&format!("persist:{name}"))).unwrap();
            assert_eq!(res, ResolvedPartition { id: name.to_string(), persistent: true });
        }
    }

    #[test]
    fn bare_identifier_is_in_memory() {
        for name in ["work", "", "Persist:upper", "persist", "p persist:"] {
            let res = resolve_partition(&bag(name)).unwrap();
            assert_eq!(res, ResolvedPartition { id: name.to_string(), persistent: false });
        }
    }

    #[test]
    fn missing_and_empty_persistent_partition_fall_back_to_default() {
        assert_eq!(resolve_partition(&ParamBag::new()).unwrap(), ResolvedPartition::default());
        assert_eq!(resolve_partition(&bag("persist:")).unwrap(), ResolvedPartition::default());
    }

    #[test]
    fn invalid_utf8_is_a_protocol_violation() {
        let params = ParamBag::new().with_bytes(PARAM_PARTITION_ID, b"persist:\xc3\x28".to_vec());
        assert!(matches!(resolve_partition(&params), Err(GuestViewError::InvalidEncoding)));
    }

    #[test]
    fn site_round_trips() {
        let names = ["", "work", "with space", "a+b", "100%", "k=v&x=y", "ünïcödé", "?#/"];
        for domain in ["app.example", "abcdefghijklmnopguest", "my appguest", "ëxtguest", "a+b%guest", "[::1]"] {
            for name in names {
                for persistent in [true, false] {
                    let p = PartitionDescriptor::new(domain, name, persistent);
                    let site = encode_site(DEFAULT_GUEST_SCHEME, &p).unwrap();
                    assert_eq!(decode_site(DEFAULT_GUEST_SCHEME, &site).unwrap(), p, "site: {site}");
                }
            }
        }
    }

    #[test]
    fn site_shape() {
        let p = PartitionDescriptor::new("app.example", "my work", true);
        let site = encode_site("guest", &p).unwrap();
        assert_eq!(site.as_str(), "guest://app.example/persist?my+work");

        let p = PartitionDescriptor::new("app.example", "", false);
        let site = encode_site("guest", &p).unwrap();
        assert_eq!(site.as_str(), "guest://app.example/?");

        let p = PartitionDescriptor::new("my appguest", "", false);
        let site = encode_site("guest", &p).unwrap();
        assert_eq!(site.as_str(), "guest://my+appguest/?");
    }

    #[test]
    fn same_partition_gives_same_site() {
        let a = encode_site("guest", &PartitionDescriptor::new("app.example", "work", true)).unwrap();
        let b = encode_site("guest", &PartitionDescriptor::new("app.example", "work", true)).unwrap();
        let c = encode_site("guest", &PartitionDescriptor::new("app.example", "work", false)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn decode_rejects_foreign_sites() {
        let https = Url::parse("https://app.example/persist?work").unwrap();
        assert!(decode_site("guest", &https).is_err());
    }

    #[test]
    fn storage_partition_id_matches_creation_parameter() {
        let p = PartitionDescriptor::new("app.example", "work", true);
        assert_eq!(p.storage_partition_id(), "persist:work");

        let again = resolve_partition(&bag(&p.storage_partition_id())).unwrap();
        assert_eq!(again, ResolvedPartition { id: "work".into(), persistent: true });

        let p = PartitionDescriptor::new("app.example", "scratch", false);
        assert_eq!(p.storage_partition_id(), "scratch");
    }

    #[test]
    fn domain_falls_back_to_owner_id() {
        let url = Url::parse("https://app.example/index.html").unwrap();
        assert_eq!(partition_domain(&url, "ext"), "app.example");

        let url = Url::parse("data:text/html,hi").unwrap();
        assert_eq!(partition_domain(&url, "ext"), "extguest");
    }
}
