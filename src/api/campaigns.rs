//! Campaign API routes

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db;
use crate::domain::{
    Campaign, CampaignDetail, CreateCampaignRequest, CreateCampaignResponse, Job,
};
use crate::events::Event;
use crate::ingest;
use crate::report::{self, ReportOptions};

use super::{ApiResponse, AppError, AppState, PaginatedResponse, Pagination};

/// Create campaign routes
pub fn campaign_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_campaigns).post(create_campaign))
        .route(
            "/:campaign_id",
            get(get_campaign)
                .post(campaign_action)
                .delete(delete_campaign),
        )
        .route("/:campaign_id/jobs", get(list_jobs))
        .route("/:campaign_id/report", get(download_report))
}

async fn detail(state: &AppState, campaign: Campaign) -> Result<CampaignDetail, AppError> {
    let avg = db::recent_job_seconds(&state.pool, &campaign.id.to_string()).await?;
    Ok(CampaignDetail {
        queued_jobs: campaign.queued_jobs(),
        eta_seconds: campaign.eta_seconds(avg),
        campaign,
    })
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateCampaignResponse>>), AppError> {
    if req.campaign_name.trim().is_empty() {
        return Err(AppError::BadRequest("campaignName must not be empty".to_string()));
    }

    let payloads = match (req.rows, req.csv) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "provide either rows or csv, not both".to_string(),
            ))
        }
        (Some(rows), None) => ingest::payloads_from_rows(rows),
        (None, Some(csv)) => {
            ingest::parse_csv(&csv).map_err(|e| AppError::Validation(e.to_string()))?
        }
        (None, None) => {
            return Err(AppError::BadRequest("rows or csv is required".to_string()))
        }
    };

    if payloads.is_empty() {
        return Err(AppError::Validation("no rows to enqueue".to_string()));
    }

    let new = db::NewCampaign {
        name: req.campaign_name,
        timezone: req.timezone.unwrap_or_else(|| "UTC".to_string()),
        created_by: req.created_by,
        parameter_set_id: req.parameter_set_id,
        sop_id: req.sop_id,
        project_id: req.project_id,
        rate_limit: state.config.rate_limit.snapshot(
            req.apply_rate_limit,
            req.requests_per_minute,
            req.requests_per_hour,
        ),
    };

    let campaign = db::create_campaign_with_jobs(&state.pool, &new, &payloads).await?;

    tracing::info!(campaign = %campaign.id, total_jobs = campaign.total_jobs, "campaign created");
    state.event_bus.publish(Event::CampaignCreated {
        campaign_id: campaign.id,
        total_jobs: campaign.total_jobs,
        timestamp: Utc::now(),
    });

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(CreateCampaignResponse {
            campaign_id: campaign.id,
            total_jobs: campaign.total_jobs,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<PaginatedResponse<CampaignDetail>>, AppError> {
    let limit = query.limit.unwrap_or(50).min(100);
    let offset = query.offset.unwrap_or(0);
    let status = query.status.as_deref();

    let campaigns = db::list_campaigns(&state.pool, status, limit, offset).await?;
    let total = db::count_campaigns(&state.pool, status).await?;

    let mut details = Vec::with_capacity(campaigns.len());
    for campaign in campaigns {
        details.push(detail(&state, campaign).await?);
    }

    Ok(Json(PaginatedResponse {
        data: details,
        pagination: Pagination {
            total,
            limit,
            offset,
            has_more: total > (offset as i64 + limit as i64),
        },
    }))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CampaignDetail>>, AppError> {
    let campaign = db::get_campaign(&state.pool, &campaign_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

    Ok(Json(ApiResponse::new(detail(&state, campaign).await?)))
}

#[derive(Debug, Deserialize)]
pub struct CampaignActionQuery {
    pub action: String,
}

async fn campaign_action(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<CampaignActionQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let campaign_key = campaign_id.to_string();
    db::get_campaign(&state.pool, &campaign_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

    match query.action.as_str() {
        "retry" => {
            let retried = db::retry_failed(&state.pool, &campaign_key).await?;
            tracing::info!(campaign = %campaign_id, retried, "failed jobs requeued");
            if retried > 0 {
                state.event_bus.publish(Event::JobsRetried {
                    campaign_id,
                    count: retried,
                    timestamp: Utc::now(),
                });
            }
            Ok(Json(ApiResponse::new(serde_json::json!({ "retried": retried }))))
        }
        "reset-stuck" => {
            let reset = db::reset_stuck(
                &state.pool,
                &campaign_key,
                state.config.worker.stale_after_secs,
            )
            .await?;
            tracing::info!(campaign = %campaign_id, reset, "stuck jobs requeued");
            if reset > 0 {
                state.event_bus.publish(Event::JobsReset {
                    campaign_id,
                    count: reset,
                    timestamp: Utc::now(),
                });
            }
            Ok(Json(ApiResponse::new(serde_json::json!({ "reset": reset }))))
        }
        other => Err(AppError::BadRequest(format!("Unknown action: {}", other))),
    }
}

/// DELETE cancels an active campaign; a terminal campaign is
/// hard-deleted together with its jobs. Running work is therefore
/// always canceled before anything is destroyed.
async fn delete_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let campaign_key = campaign_id.to_string();
    let campaign = db::get_campaign(&state.pool, &campaign_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

    if campaign.status.is_active() {
        let canceled = db::cancel_campaign(&state.pool, &campaign_key)
            .await?
            .unwrap_or(0);
        tracing::info!(campaign = %campaign_id, canceled, "campaign canceled");
        state.event_bus.publish(Event::CampaignCanceled {
            campaign_id,
            canceled_jobs: canceled,
            timestamp: Utc::now(),
        });
        return Ok(Json(ApiResponse::new(serde_json::json!({
            "status": "canceled",
            "canceledJobs": canceled,
        })))
        .into_response());
    }

    db::delete_campaign(&state.pool, &campaign_key).await?;
    tracing::info!(campaign = %campaign_id, "campaign deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<PaginatedResponse<Job>>, AppError> {
    let campaign_key = campaign_id.to_string();
    db::get_campaign(&state.pool, &campaign_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);
    let status = query.status.as_deref();

    let jobs = db::list_jobs(&state.pool, &campaign_key, status, limit, offset).await?;
    let total = db::count_jobs(&state.pool, &campaign_key, status).await?;

    Ok(Json(PaginatedResponse {
        data: jobs,
        pagination: Pagination {
            total,
            limit,
            offset,
            has_more: total > (offset as i64 + limit as i64),
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub include_tokens: Option<bool>,
    pub pass_threshold: Option<f64>,
}

async fn download_report(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> Result<axum::response::Response, AppError> {
    let campaign_key = campaign_id.to_string();
    let campaign = db::get_campaign(&state.pool, &campaign_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;

    let total = db::count_jobs(&state.pool, &campaign_key, None).await?;
    let jobs = db::list_jobs(&state.pool, &campaign_key, None, total as i32, 0).await?;

    let options = ReportOptions {
        include_tokens: query.include_tokens.unwrap_or(false),
        pass_threshold: query
            .pass_threshold
            .unwrap_or(state.config.report.pass_threshold),
    };

    let bytes = report::generate(&campaign, &jobs, &options)
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let filename = format!("campaign-{}-report.csv", campaign_id);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
