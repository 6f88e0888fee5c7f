// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use crate::domain::models::generation::GenerationUpdate;
use crate::engines::traits::{
    classify_status, ClientError, DispatchOutcome, DispatchRequest, GenerationClient,
};

/// 基于reqwest的远端生成服务客户端
///
/// `POST {base}/generations` 派发批次，`GET {base}/generations/{id}` 查询进度。
pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGenerationClient {
    /// 创建客户端
    ///
    /// # 参数
    ///
    /// * `base_url` - 远端服务根地址
    /// * `api_key` - Bearer 令牌，可为空
    /// * `timeout` - 单次请求超时
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpGenerationClient)` - 客户端实例
    /// * `Err(ClientError)` - 地址或令牌不合法
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, ClientError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ClientError::Rejected(format!("Invalid base url {}: {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ClientError::Rejected(format!("Invalid api key: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("genflow/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Rejected(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// 查询地址，generation_id 作为单个路径段编码
    fn generation_url(&self, generation_id: &str) -> Result<Url, ClientError> {
        if matches!(generation_id, "" | "." | "..") {
            return Err(ClientError::InvalidResponse(format!(
                "invalid generation id {:?}",
                generation_id
            )));
        }
        let mut url = self.endpoint("generations")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Rejected(format!("Base url {} cannot carry a path", self.base_url)))?
            .push(generation_id);
        Ok(url)
    }

    async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

/// 解析派发响应
///
/// `{"status": "accepted", "generation_id": "..."}` 或
/// `{"status": "completed", "results": {...}, "success_count": n, "fail_count": n, "is_terminal": true}`
pub fn decode_dispatch_response(body: serde_json::Value) -> Result<DispatchOutcome, ClientError> {
    let status = body
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ClientError::InvalidResponse("missing status field".to_string()))?;

    match status {
        "accepted" => {
            let generation_id = body
                .get("generation_id")
                .and_then(|g| g.as_str())
                .filter(|g| !g.is_empty())
                .ok_or_else(|| ClientError::InvalidResponse("missing generation_id".to_string()))?;
            Ok(DispatchOutcome::Accepted {
                generation_id: generation_id.to_string(),
            })
        }
        "completed" => serde_json::from_value::<GenerationUpdate>(body)
            .map(DispatchOutcome::Completed)
            .map_err(|e| ClientError::InvalidResponse(e.to_string())),
        other => Err(ClientError::InvalidResponse(format!(
            "unknown dispatch status: {}",
            other
        ))),
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, ClientError> {
        let url = self.endpoint("generations")?;
        let start = Instant::now();
        let response = self.client.post(url).json(request).send().await?;
        let body = Self::read_json(response).await?;
        debug!(
            batch_id = %request.batch_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch response received"
        );
        decode_dispatch_response(body)
    }

    async fn fetch_updates(&self, generation_id: &str) -> Result<GenerationUpdate, ClientError> {
        let url = self.generation_url(generation_id)?;
        let response = self.client.get(url).send().await?;
        let body = Self::read_json(response).await?;
        serde_json::from_value(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_accepted() {
        let outcome =
            decode_dispatch_response(json!({"status": "accepted", "generation_id": "gen-1"}))
                .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Accepted {
                generation_id: "gen-1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_completed_with_results() {
        let outcome = decode_dispatch_response(json!({
            "status": "completed",
            "results": {"7": {"title": "ok"}},
            "success_count": 1,
            "fail_count": 0,
            "is_terminal": true
        }))
        .unwrap();

        match outcome {
            DispatchOutcome::Completed(update) => {
                assert!(update.is_terminal);
                assert_eq!(update.results.get(&7).unwrap()["title"], "ok");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        assert!(matches!(
            decode_dispatch_response(json!({"success": true})),
            Err(ClientError::InvalidResponse(_))
        ));
        assert!(decode_dispatch_response(json!({"status": "accepted"})).is_err());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client =
            HttpGenerationClient::new("http://remote.test/api/v1", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            client.endpoint("generations/abc").unwrap().as_str(),
            "http://remote.test/api/v1/generations/abc"
        );
    }

    #[test]
    fn test_generation_id_is_a_single_path_segment() {
        let client =
            HttpGenerationClient::new("http://remote.test/api/v1", None, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            client.generation_url("gen-1").unwrap().as_str(),
            "http://remote.test/api/v1/generations/gen-1"
        );
        assert_eq!(
            client.generation_url("a/../b?c#d").unwrap().as_str(),
            "http://remote.test/api/v1/generations/a%2F..%2Fb%3Fc%23d"
        );
        assert!(matches!(
            client.generation_url(".."),
            Err(ClientError::InvalidResponse(_))
        ));
        assert!(client.generation_url("").is_err());
    }
}
