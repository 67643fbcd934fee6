//! Access reviews backed by the Kubernetes authorization API.

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes as KubeResourceAttributes, SelfSubjectAccessReview,
    SelfSubjectAccessReviewSpec, SubjectAccessReview, SubjectAccessReviewSpec,
    SubjectAccessReviewStatus,
};
use kube::api::{Api, PostParams};
use kube::config::AuthInfo;
use kube::{Client, Config};
use tracing::trace;

use crate::review::{AccessReviewer, ResourceAttributes, ReviewError, ReviewSubject};

/// [`AccessReviewer`] issuing `SubjectAccessReview` and
/// `SelfSubjectAccessReview` requests.
///
/// Impersonated reviews are created with the platform's own client. Self
/// reviews are created with a client built from the same cluster settings
/// but authenticating with nothing except the caller's bearer token.
#[derive(Clone)]
pub struct KubeAccessReviewer {
    client: Client,
    config: Config,
}

impl std::fmt::Debug for KubeAccessReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeAccessReviewer")
            .field("cluster_url", &self.config.cluster_url)
            .finish_non_exhaustive()
    }
}

impl KubeAccessReviewer {
    /// Creates a reviewer from the privileged client and the configuration
    /// it was built from.
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }

    /// Builds a client that authenticates with `token` only.
    fn client_for_token(&self, token: &str) -> Result<Client, ReviewError> {
        Client::try_from(token_config(&self.config, token))
            .map_err(|e| ReviewError::backend(format!("building caller client: {e}")))
    }

    async fn impersonated_review(
        &self,
        attributes: &ResourceAttributes,
        username: String,
    ) -> Result<(), ReviewError> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let review = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(username),
                resource_attributes: Some(to_kube_attributes(attributes)),
                ..SubjectAccessReviewSpec::default()
            },
            ..SubjectAccessReview::default()
        };
        let created = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(classify)?;
        verdict(created.status)
    }

    async fn self_review(
        &self,
        attributes: &ResourceAttributes,
        token: &str,
    ) -> Result<(), ReviewError> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client_for_token(token)?);
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(to_kube_attributes(attributes)),
                ..SelfSubjectAccessReviewSpec::default()
            },
            ..SelfSubjectAccessReview::default()
        };
        let created = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(classify)?;
        verdict(created.status)
    }
}

#[async_trait]
impl AccessReviewer for KubeAccessReviewer {
    async fn review(
        &self,
        attributes: &ResourceAttributes,
        subject: &ReviewSubject,
    ) -> Result<(), ReviewError> {
        trace!(?attributes, ?subject, "sending access review");
        match subject {
            ReviewSubject::ServiceAccount(sa) => {
                self.impersonated_review(attributes, sa.username()).await
            }
            ReviewSubject::BearerToken(token) => self.self_review(attributes, token).await,
        }
    }
}

/// The cluster settings of `base` with every credential replaced by `token`.
///
/// Certificates, exec plugins, basic auth, token files and impersonation
/// would all take precedence over a bearer token, so the whole `AuthInfo`
/// is replaced.
fn token_config(base: &Config, token: &str) -> Config {
    let mut config = base.clone();
    config.auth_info = AuthInfo {
        token: Some(token.to_string().into()),
        ..AuthInfo::default()
    };
    config
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn to_kube_attributes(attributes: &ResourceAttributes) -> KubeResourceAttributes {
    KubeResourceAttributes {
        verb: non_empty(&attributes.verb),
        // The core group must be sent as "" rather than omitted.
        group: Some(attributes.group.clone()),
        version: non_empty(&attributes.version),
        resource: non_empty(&attributes.resource),
        subresource: non_empty(&attributes.subresource),
        namespace: non_empty(&attributes.namespace),
        name: non_empty(&attributes.name),
        ..KubeResourceAttributes::default()
    }
}

fn verdict(status: Option<SubjectAccessReviewStatus>) -> Result<(), ReviewError> {
    let status = status.unwrap_or_default();
    if status.allowed {
        return Ok(());
    }
    if let Some(err) = status.evaluation_error.filter(|e| !e.is_empty()) {
        trace!(evaluation_error = %err, "authorizer reported an evaluation error");
    }
    Err(ReviewError::forbidden(status.reason.unwrap_or_default()))
}

/// A 403 from the review API itself means the subject may not even ask,
/// which is a denial. Everything else is a backend failure.
fn classify(err: kube::Error) -> ReviewError {
    match err {
        kube::Error::Api(resp) if resp.code == 403 => ReviewError::forbidden(resp.message),
        other => ReviewError::backend(other.to_string()),
    }
}
