use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::future::Future;
use tokio::sync::watch;

/// `namespace/name` identity of a request `Secret`, used in logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&Secret> for SecretRef {
    fn from(o: &Secret) -> Self {
        Self {
            name: o.name_any(),
            namespace: o.namespace().unwrap_or_else(|| "".to_string()),
        }
    }
}

pub(crate) fn metric_name(name: &str) -> String {
    format!("credential_janitor_{}", name)
}

/// One page of a paginated listing.
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    /// Cursor of the following page, `None` on the last page.
    pub next_page: Option<u32>,
}

/// Follow page cursors starting at page 1 until the fetcher reports no next page and
/// return all items.
///
/// The first fetch error is returned as is and the items collected so far are discarded,
/// as a partial listing must not be used to decide which credentials exist.
pub(crate) async fn collect_all<T, E, F, Fut>(mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    let mut items = Vec::new();
    let mut page = 1u32;
    loop {
        let result = fetch(page).await?;
        items.extend(result.items);
        match result.next_page {
            // Only ever move forward, a server repeating a cursor would loop forever.
            Some(next) if next > page => page = next,
            _ => break,
        }
    }
    Ok(items)
}

/// Shared shutdown signal, closed once and observed by all watch loops and workers.
#[derive(Clone)]
pub(crate) struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub(crate) fn new() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self(receiver))
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal fired or its sender was dropped.
    pub(crate) async fn stopped(&mut self) {
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Mutex, time::Duration};

    fn pages(total: usize, size: usize, page: u32) -> Page<usize> {
        let start = (page as usize - 1) * size;
        let items: Vec<usize> = (start..total.min(start + size)).collect();
        Page {
            next_page: if start + size < total {
                Some(page + 1)
            } else {
                None
            },
            items,
        }
    }

    #[tokio::test]
    async fn collect_all_follows_cursor_from_first_page() {
        let requested = Mutex::new(Vec::new());
        let items = collect_all(|page| {
            requested.lock().unwrap().push(page);
            async move { Ok::<_, String>(pages(7, 3, page)) }
        })
        .await
        .unwrap();
        assert_eq!(items, (0..7).collect::<Vec<_>>());
        assert_eq!(*requested.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn collect_all_discards_partial_results_on_error() {
        let result = collect_all(|page| async move {
            if page == 2 {
                Err("page 2 unavailable".to_string())
            } else {
                Ok(pages(10, 3, page))
            }
        })
        .await;
        assert_eq!(result, Err("page 2 unavailable".to_string()));
    }

    #[tokio::test]
    async fn collect_all_stops_on_non_advancing_cursor() {
        let items = collect_all(|page| async move {
            Ok::<_, String>(Page {
                items: vec![page],
                next_page: Some(1),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
    }

    #[test]
    fn secret_ref_displays_namespace_and_name() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("gitea-token".to_string());
        secret.metadata.namespace = Some("ci".to_string());
        assert_eq!(SecretRef::from(&secret).to_string(), "ci/gitea-token");
    }

    #[tokio::test]
    async fn stop_signal_resolves_for_every_clone() {
        let (sender, signal) = StopSignal::new();
        let mut a = signal.clone();
        let mut b = signal.clone();
        assert!(!signal.is_stopped());
        sender.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            a.stopped().await;
            b.stopped().await;
        })
        .await
        .unwrap();
        assert!(signal.is_stopped());
    }
}
