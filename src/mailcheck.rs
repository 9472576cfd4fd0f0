//! Mail domain verification for mined addresses.

use anyhow::Context;
use tokio::runtime::Handle;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Answers whether a domain can receive mail.
///
/// `Ok(false)` means the domain provably has no mail exchanger and its
/// addresses are dropped. `Err` means the answer is unknown; callers keep
/// the address.
pub trait MailDomainCheck: Send + Sync {
    fn accepts_mail(&self, domain: &str) -> anyhow::Result<bool>;
}

/// MX lookups with the resolver's default upstreams, driven from the crawl
/// thread by blocking on the server runtime.
pub struct DnsMailCheck {
    resolver: TokioAsyncResolver,
    handle: Handle,
}

impl DnsMailCheck {
    pub fn new(handle: Handle) -> Self {
        let _guard = handle.enter();
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver, handle }
    }
}

impl MailDomainCheck for DnsMailCheck {
    fn accepts_mail(&self, domain: &str) -> anyhow::Result<bool> {
        self.handle.block_on(async {
            match self.resolver.mx_lookup(domain).await {
                Ok(lookup) => Ok(lookup.iter().next().is_some()),
                Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(false),
                Err(e) => Err(e).with_context(|| format!("MX lookup for {}", domain)),
            }
        })
    }
}
