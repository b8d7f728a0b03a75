use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::cache::ProfileCache;
use crate::error::{Error, Result};
use crate::guard::StoreGuard;
use crate::models::{AminoAcid, Food};
use crate::normalize;
use crate::scoring::{self, AminoProfile, FoodProfile, MixItem};
use crate::store::RecordStore;

pub struct AppState<S> {
    pub store: S,
    pub guard: StoreGuard,
    pub cache: ProfileCache,
}

impl<S: RecordStore> AppState<S> {
    /// Cached profile if present, otherwise read from the store and cached.
    fn profile(&self, food_id: i32) -> Result<FoodProfile> {
        if let Some(profile) = self.cache.get(food_id) {
            return Ok(profile);
        }
        let profile = self
            .guard
            .call(|| scoring::food_profile(&self.store, food_id))?;
        self.cache.put(&profile);
        Ok(profile)
    }
}

pub fn configure<S: RecordStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/apis/foods").route(web::get().to(search::<S>)))
        .service(web::resource("/apis/foods/{food_id}/amino").route(web::get().to(food_amino::<S>)))
        .service(
            web::resource("/apis/foods/{food_id}/conversion").route(web::get().to(conversion::<S>)),
        )
        .service(web::resource("/apis/recommend").route(web::get().to(recommend::<S>)))
        .service(web::resource("/apis/mix").route(web::post().to(mix::<S>)));
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

async fn search<S: RecordStore + 'static>(
    state: web::Data<AppState<S>>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse> {
    let SearchQuery { q, limit } = query.into_inner();
    let found: Vec<Food> =
        web::block(move || state.guard.call(|| scoring::search_foods(&state.store, &q, limit))).await??;
    Ok(HttpResponse::Ok().json(found))
}

async fn food_amino<S: RecordStore + 'static>(
    state: web::Data<AppState<S>>,
    food_id: web::Path<i32>,
) -> Result<HttpResponse> {
    let food_id = food_id.into_inner();
    let profile = web::block(move || state.profile(food_id)).await??;
    Ok(HttpResponse::Ok().json(profile))
}

#[derive(Deserialize)]
struct ConversionQuery {
    grams: f64,
}

#[derive(Serialize)]
struct ConversionResponse {
    food_id: i32,
    grams: f64,
    amino_acids_mg: AminoProfile,
}

async fn conversion<S: RecordStore + 'static>(
    state: web::Data<AppState<S>>,
    food_id: web::Path<i32>,
    query: web::Query<ConversionQuery>,
) -> Result<HttpResponse> {
    let food_id = food_id.into_inner();
    let grams = query.grams;
    scoring::check_grams(grams)?;

    let amino_acids_mg = web::block(move || state.profile(food_id)?.actual(grams)).await??;
    Ok(HttpResponse::Ok().json(ConversionResponse {
        food_id,
        grams,
        amino_acids_mg,
    }))
}

/// `?lysine=300&methionine=120&exclude=3,7&top_n=10`: every amino acid name
/// is a required amount in mg.
#[derive(Debug, PartialEq)]
struct RecommendQuery {
    target: AminoProfile,
    exclude: Vec<i32>,
    top_n: Option<usize>,
}

impl RecommendQuery {
    fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mut query = RecommendQuery {
            target: AminoProfile::new(),
            exclude: Vec::new(),
            top_n: None,
        };
        for (name, value) in params {
            match normalize::identifier(name).as_str() {
                "exclude" => {
                    query.exclude = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(|id| {
                            id.parse()
                                .map_err(|_| Error::Validation(format!("invalid food id {id:?}")))
                        })
                        .collect::<Result<_>>()?;
                }
                "top_n" => {
                    let n: usize = value
                        .trim()
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid top_n {value:?}")))?;
                    query.top_n = Some(n);
                }
                other => {
                    let acid: AminoAcid = other.parse()?;
                    query.target.insert(acid, normalize::decimal(value)?);
                }
            }
        }
        Ok(query)
    }
}

async fn recommend<S: RecordStore + 'static>(
    state: web::Data<AppState<S>>,
    params: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse> {
    let query = RecommendQuery::from_params(&params)?;
    let ranked = web::block(move || {
        state.guard.call(|| {
            scoring::recommend(&state.store, &query.target, &query.exclude, query.top_n)
        })
    })
    .await??;
    Ok(HttpResponse::Ok().json(ranked))
}

#[derive(Deserialize)]
struct MixRequest {
    items: Vec<MixItem>,
}

#[derive(Serialize)]
struct MixResponse {
    totals_mg: AminoProfile,
}

async fn mix<S: RecordStore + 'static>(
    state: web::Data<AppState<S>>,
    request: web::Json<MixRequest>,
) -> Result<HttpResponse> {
    let items = request.into_inner().items;
    let totals_mg = web::block(move || state.guard.call(|| scoring::mix(&state.store, &items))).await??;
    Ok(HttpResponse::Ok().json(MixResponse { totals_mg }))
}
