use serde::{Deserialize, Serialize};
use tide::Body;
use tide::{Request, Response, StatusCode};

use crate::mirror::{mirror, MirrorRequest};
use crate::page::SiteProfile;
use crate::session::HttpSession;
use crate::state::{JobRecord, JobStatus, State};
use crate::status::collect_status;

#[derive(Deserialize, Debug)]
struct MirrorJob {
    /// Full site profile; a generic one is built from `base_url` otherwise.
    #[serde(default)]
    profile: Option<SiteProfile>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(flatten)]
    request: MirrorRequest,
}

#[derive(Deserialize, Serialize)]
struct PostMirrorAnswer {
    pub id: String,
}

impl MirrorJob {
    fn profile(&self) -> tide::Result<SiteProfile> {
        let profile = match (&self.profile, &self.base_url) {
            (Some(x), _) => x.clone(),
            (None, Some(x)) => SiteProfile::generic(x),
            (None, None) => {
                return Err(tide::Error::from_str(
                    StatusCode::BadRequest,
                    "either profile or base_url is required",
                ))
            }
        };
        profile
            .validate()
            .map_err(|e| tide::Error::from_str(StatusCode::BadRequest, e.to_string()))?;
        Ok(profile)
    }
}

/// Id of the job mirroring `base_url` into `target`.
pub fn job_id(base_url: &str, target: &str) -> String {
    format!("{:x}", md5::compute(format!("{}{}", base_url, target)))
}

fn accepted(id: String) -> tide::Result {
    let body = PostMirrorAnswer { id };
    let mut res = Response::new(StatusCode::Accepted);
    res.set_body(Body::from_json(&body)?);
    Ok(res)
}

pub async fn post_mirror(mut req: Request<State>) -> tide::Result {
    let job: MirrorJob = req.body_json().await?;
    let profile = job.profile()?;
    let id = job_id(&profile.base_url, &job.request.target.display().to_string());
    tracing::info!("mirror job {} for {}", id, profile.base_url);

    let record = JobRecord::new();
    let messages = record.messages.clone();
    let cancel = record.cancel.clone();
    {
        let mut jobs = req.state().jobs.write().await;
        if jobs.get(&id).map_or(false, |x| x.status == JobStatus::Running) {
            return accepted(id);
        }
        jobs.insert(id.clone(), record);
    }

    let state = req.state().clone();
    let job_key = id.clone();
    async_std::task::spawn(async move {
        let result = match HttpSession::new(&profile, cancel.clone()) {
            Ok(session) => mirror(&session, &profile, &job.request, collect_status(messages), cancel)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let mut jobs = state.jobs.write().await;
        if let Some(record) = jobs.get_mut(&job_key) {
            match result {
                Ok(report) => {
                    record.status = JobStatus::Finished;
                    record.report = Some(report);
                }
                Err(e) => {
                    tracing::warn!("mirror job {} failed: {}", job_key, e);
                    record.status = JobStatus::Failed;
                    record.error = Some(e);
                }
            }
        }
    });

    accepted(id)
}

pub async fn get_mirror(req: Request<State>) -> tide::Result {
    let jobs = req.state().jobs.read().await;
    let id = req.param("id")?;

    if let Some(record) = jobs.get(id) {
        let mut res = Response::new(StatusCode::Ok);
        res.set_body(Body::from_json(&record.view(id))?);
        return Ok(res);
    }

    Ok(Response::new(StatusCode::NotFound))
}

pub async fn get_mirror_count(req: Request<State>) -> tide::Result {
    let jobs = req.state().jobs.read().await;
    let id = req.param("id")?;

    if let Some(record) = jobs.get(id) {
        let mut res = Response::new(StatusCode::Ok);
        res.set_body(Body::from_json(&record.saved())?);
        return Ok(res);
    }

    Ok(Response::new(StatusCode::NotFound))
}

/// Asks a running job to stop after the item it is working on.
pub async fn delete_mirror(req: Request<State>) -> tide::Result {
    let jobs = req.state().jobs.read().await;
    let id = req.param("id")?;

    match jobs.get(id) {
        Some(record) => {
            record.cancel.cancel();
            Ok(Response::new(StatusCode::Accepted))
        }
        None => Ok(Response::new(StatusCode::NotFound)),
    }
}

pub fn app(state: State) -> tide::Server<State> {
    let mut app = tide::with_state(state);
    app.at("/mirror").post(post_mirror);
    app.at("/mirror/:id").get(get_mirror).delete(delete_mirror);
    app.at("/mirror/:id/count").get(get_mirror_count);
    app
}
