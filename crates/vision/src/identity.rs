//! Stable id → node mapping for markers seen across frames.
//!
//! Every distinct marker id owns exactly one [`TrackedNode`]. Observations
//! update the node in place; a marker that leaves the view keeps its node at
//! the last known transform unless a [`RetentionPolicy`] says otherwise.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    str::FromStr,
};

use glam::{Mat4, Quat, Vec3};
use marker_core::{DetectionResult, MarkerId, MarkerObservation};

/// Identity of a node, assigned once at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

#[derive(Debug, Clone)]
pub struct TrackedNode {
    handle: NodeHandle,
    id: MarkerId,
    transform: Mat4,
    first_seen: f64,
    last_seen: f64,
    observations: u64,
}

impl TrackedNode {
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }

    /// World transform: marker-local pose composed with the camera pose.
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn translation(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    pub fn first_seen(&self) -> f64 {
        self.first_seen
    }

    /// Timestamp of the latest frame that contained this marker.
    pub fn last_seen(&self) -> f64 {
        self.last_seen
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }
}

/// When, if ever, a node whose marker is no longer observed is removed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RetentionPolicy {
    /// Nodes live for the whole session.
    #[default]
    KeepForever,
    /// Remove nodes not observed for longer than this many seconds.
    ExpireAfter(f64),
}

impl RetentionPolicy {
    fn keeps(&self, node: &TrackedNode, now: f64) -> bool {
        match *self {
            RetentionPolicy::KeepForever => true,
            RetentionPolicy::ExpireAfter(max_age) => now - node.last_seen <= max_age,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::KeepForever => f.write_str("keep"),
            RetentionPolicy::ExpireAfter(secs) => write!(f, "expire:{secs}"),
        }
    }
}

/// Accepts `keep` or `expire:<seconds>`.
impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "keep" => Ok(RetentionPolicy::KeepForever),
            other => {
                let secs = other
                    .strip_prefix("expire:")
                    .ok_or_else(|| format!("expected `keep` or `expire:<secs>`, got `{other}`"))?
                    .parse::<f64>()
                    .map_err(|err| format!("invalid expiry seconds: {err}"))?;
                if !(secs.is_finite() && secs >= 0.0) {
                    return Err(format!("expiry must be a non-negative number, got {secs}"));
                }
                Ok(RetentionPolicy::ExpireAfter(secs))
            }
        }
    }
}

/// What one call to [`IdentityCache::reconcile`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheUpdate {
    pub created: usize,
    pub updated: usize,
    pub expired: usize,
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    nodes: HashMap<MarkerId, TrackedNode>,
    next_handle: u64,
    retention: RetentionPolicy,
}

impl IdentityCache {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            nodes: HashMap::new(),
            next_handle: 0,
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Fold one frame of observations into the cache.
    ///
    /// `camera_pose` is the camera transform at capture time; each node gets
    /// `marker_transform(observation) * camera_pose`.
    pub fn reconcile(
        &mut self,
        detections: &DetectionResult,
        camera_pose: Mat4,
        timestamp: f64,
    ) -> CacheUpdate {
        let mut update = CacheUpdate::default();
        for observation in detections {
            let transform = marker_transform(observation) * camera_pose;
            match self.nodes.entry(observation.id) {
                Entry::Occupied(mut entry) => {
                    let node = entry.get_mut();
                    node.transform = transform;
                    node.last_seen = timestamp;
                    node.observations += 1;
                    update.updated += 1;
                }
                Entry::Vacant(entry) => {
                    let handle = NodeHandle(self.next_handle);
                    self.next_handle += 1;
                    entry.insert(TrackedNode {
                        handle,
                        id: observation.id,
                        transform,
                        first_seen: timestamp,
                        last_seen: timestamp,
                        observations: 1,
                    });
                    update.created += 1;
                }
            }
        }
        update.expired = self.sweep(timestamp);
        update
    }

    /// Apply the retention policy at time `now`, returning how many nodes went away.
    pub fn sweep(&mut self, now: f64) -> usize {
        if self.retention == RetentionPolicy::KeepForever {
            return 0;
        }
        let before = self.nodes.len();
        let retention = self.retention;
        self.nodes.retain(|_, node| retention.keeps(node, now));
        before - self.nodes.len()
    }

    pub fn get(&self, id: MarkerId) -> Option<&TrackedNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedNode> {
        self.nodes.values()
    }
}

/// Marker-local pose as a matrix, reading `orientation` as a Rodrigues vector.
pub fn marker_transform(observation: &MarkerObservation) -> Mat4 {
    let rotation = Quat::from_scaled_axis(Vec3::from_array(observation.orientation));
    Mat4::from_rotation_translation(rotation, Vec3::from_array(observation.position))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn obs(id: MarkerId, position: [f32; 3]) -> MarkerObservation {
        MarkerObservation::new(id, position, [0.0; 3])
    }

    fn frame(markers: Vec<MarkerObservation>) -> DetectionResult {
        DetectionResult::from(markers)
    }

    #[test]
    fn node_count_tracks_distinct_ids_and_never_shrinks() {
        let mut cache = IdentityCache::default();
        let frames = [
            frame(vec![obs(1, [0.0; 3]), obs(2, [0.0; 3])]),
            frame(vec![]),
            frame(vec![obs(2, [1.0; 3])]),
            frame(vec![obs(5, [0.0; 3]), obs(1, [0.0; 3])]),
            frame(vec![obs(9, [0.0; 3])]),
        ];
        let expected = [2, 2, 2, 3, 4];

        let mut previous = 0;
        for (i, (detections, expected)) in frames.iter().zip(expected).enumerate() {
            cache.reconcile(detections, Mat4::IDENTITY, i as f64);
            assert_eq!(cache.len(), expected);
            assert!(cache.len() >= previous);
            previous = cache.len();
        }
    }

    #[test]
    fn reobserving_updates_in_place() {
        let mut cache = IdentityCache::default();
        let first = cache.reconcile(&frame(vec![obs(4, [0.1, 0.2, 0.3])]), Mat4::IDENTITY, 1.0);
        assert_eq!(first, CacheUpdate { created: 1, updated: 0, expired: 0 });
        let handle = cache.get(4).unwrap().handle();

        let second = cache.reconcile(&frame(vec![obs(4, [1.0, 2.0, 3.0])]), Mat4::IDENTITY, 2.0);
        assert_eq!(second, CacheUpdate { created: 0, updated: 1, expired: 0 });

        let node = cache.get(4).unwrap();
        assert_eq!(node.handle(), handle);
        assert_eq!(node.observations(), 2);
        assert_eq!(node.first_seen(), 1.0);
        assert_eq!(node.last_seen(), 2.0);
        assert!(node.translation().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn absent_markers_keep_last_transform() {
        let mut cache = IdentityCache::default();
        cache.reconcile(
            &frame(vec![obs(1, [0.5, 0.0, 0.0]), obs(2, [0.0; 3])]),
            Mat4::IDENTITY,
            0.0,
        );
        let before = cache.get(1).unwrap().transform();

        cache.reconcile(&frame(vec![obs(2, [9.0; 3])]), Mat4::IDENTITY, 100.0);
        let node = cache.get(1).unwrap();
        assert_eq!(node.transform(), before);
        assert_eq!(node.last_seen(), 0.0);
    }

    #[test]
    fn composes_marker_then_camera() {
        let camera = Mat4::from_rotation_translation(
            Quat::from_rotation_z(FRAC_PI_2),
            Vec3::new(0.0, 2.0, 0.0),
        );
        let observation = MarkerObservation::new(3, [1.0, 0.0, 0.0], [0.0, 0.0, FRAC_PI_2]);
        let mut cache = IdentityCache::default();
        cache.reconcile(&frame(vec![observation.clone()]), camera, 0.0);

        let expected = marker_transform(&observation) * camera;
        let node = cache.get(3).unwrap();
        assert!(node.transform().abs_diff_eq(expected, 1e-6));
        assert!(!node.transform().abs_diff_eq(camera * marker_transform(&observation), 1e-3));
    }

    #[test]
    fn marker_transform_reads_rodrigues_vector() {
        let observation = MarkerObservation::new(0, [0.0, 0.0, 1.0], [0.0, 0.0, FRAC_PI_2]);
        let transform = marker_transform(&observation);
        let x_axis = transform.transform_vector3(Vec3::X);
        assert!(x_axis.abs_diff_eq(Vec3::Y, 1e-6));
        assert!(transform.w_axis.truncate().abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn expiry_policy_sweeps_stale_nodes() {
        let mut cache = IdentityCache::new(RetentionPolicy::ExpireAfter(1.0));
        cache.reconcile(&frame(vec![obs(1, [0.0; 3]), obs(2, [0.0; 3])]), Mat4::IDENTITY, 0.0);
        let update = cache.reconcile(&frame(vec![obs(2, [0.0; 3])]), Mat4::IDENTITY, 0.5);
        assert_eq!(update.expired, 0);

        let update = cache.reconcile(&frame(vec![obs(2, [0.0; 3])]), Mat4::IDENTITY, 1.5);
        assert_eq!(update.expired, 1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn keep_forever_never_sweeps() {
        let mut cache = IdentityCache::default();
        cache.reconcile(&frame(vec![obs(1, [0.0; 3])]), Mat4::IDENTITY, 0.0);
        assert_eq!(cache.sweep(1.0e9), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn retention_parses_from_cli_text() {
        assert_eq!("keep".parse::<RetentionPolicy>(), Ok(RetentionPolicy::KeepForever));
        assert_eq!("expire:2.5".parse::<RetentionPolicy>(), Ok(RetentionPolicy::ExpireAfter(2.5)));
        assert!("expire:-1".parse::<RetentionPolicy>().is_err());
        assert!("forever".parse::<RetentionPolicy>().is_err());
        assert_eq!(RetentionPolicy::ExpireAfter(3.0).to_string(), "expire:3");
    }
}
