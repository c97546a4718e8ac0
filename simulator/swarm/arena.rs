//! Square arena with random-walk robots

use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::PI;

use super::config::ArenaConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

pub struct Arena {
    config: ArenaConfig,
    poses: Vec<Pose>,
}

impl Arena {
    /// Scatter `count` robots uniformly over the arena
    pub fn scatter(config: ArenaConfig, count: usize, rng: &mut StdRng) -> Self {
        let poses = (0..count)
            .map(|_| Pose {
                x: rng.gen_range(0.0..config.size),
                y: rng.gen_range(0.0..config.size),
                heading: rng.gen_range(-PI..PI),
            })
            .collect();
        Self { config, poses }
    }

    pub fn pose(&self, index: usize) -> Pose {
        self.poses[index]
    }

    /// Advance one robot; walls reflect
    pub fn walk(&mut self, index: usize, rng: &mut StdRng) {
        let turn = self.config.turn;
        let size = self.config.size;
        let speed = self.config.speed;
        let pose = &mut self.poses[index];

        if turn > 0.0 {
            pose.heading += rng.gen_range(-turn..turn);
        }
        pose.x += speed * pose.heading.cos();
        pose.y += speed * pose.heading.sin();

        if pose.x < 0.0 || pose.x > size {
            pose.x = pose.x.clamp(0.0, size);
            pose.heading = PI - pose.heading;
        }
        if pose.y < 0.0 || pose.y > size {
            pose.y = pose.y.clamp(0.0, size);
            pose.heading = -pose.heading;
        }
    }

    /// Indices within radio range of `index`, among those `alive`
    pub fn neighbors(&self, index: usize, alive: &[bool]) -> Vec<usize> {
        let me = self.poses[index];
        let range_sq = self.config.radio_range * self.config.radio_range;

        self.poses
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != index && alive[*j])
            .filter(|(_, p)| {
                let dx = p.x - me.x;
                let dy = p.y - me.y;
                dx * dx + dy * dy <= range_sq
            })
            .map(|(j, _)| j)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_walk_stays_inside() {
        let mut rng = StdRng::from_seed([3u8; 32]);
        let config = ArenaConfig {
            size: 1.0,
            speed: 0.2,
            ..Default::default()
        };
        let mut arena = Arena::scatter(config, 4, &mut rng);

        for _ in 0..500 {
            for i in 0..4 {
                arena.walk(i, &mut rng);
                let p = arena.pose(i);
                assert!((0.0..=1.0).contains(&p.x));
                assert!((0.0..=1.0).contains(&p.y));
            }
        }
    }

    #[test]
    fn test_neighbors_respect_range_and_liveness() {
        let config = ArenaConfig {
            radio_range: 0.5,
            ..Default::default()
        };
        let arena = Arena {
            config,
            poses: vec![
                Pose { x: 0.0, y: 0.0, heading: 0.0 },
                Pose { x: 0.3, y: 0.0, heading: 0.0 },
                Pose { x: 0.0, y: 0.4, heading: 0.0 },
                Pose { x: 1.0, y: 1.0, heading: 0.0 },
            ],
        };

        assert_eq!(arena.neighbors(0, &[true; 4]), vec![1, 2]);
        assert_eq!(arena.neighbors(0, &[true, true, false, true]), vec![1]);
        assert!(arena.neighbors(3, &[true; 4]).is_empty());
    }
}
