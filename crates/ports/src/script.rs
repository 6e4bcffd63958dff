//! 服务端原子脚本

/// 命名的服务端脚本
///
/// `name` 是稳定标识，不支持 Lua 的存储实现按名称解释脚本语义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreScript {
    pub name: &'static str,
    pub source: &'static str,
}

impl StoreScript {
    /// 比较并删除：KEYS[1] 的值等于 ARGV[1] 时删除，返回删除数量
    pub const COMPARE_AND_DELETE: StoreScript = StoreScript {
        name: "compare_and_delete",
        source: r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            ",
    };

    /// 自增，首次创建时设置过期时间 ARGV[1]（秒），返回自增后的值
    pub const INCR_WITH_TTL: StoreScript = StoreScript {
        name: "incr_with_ttl",
        source: r"
            local current = redis.call('INCR', KEYS[1])
            if current == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return current
            ",
    };

    /// 所有内置脚本，供存储实现启动时预加载
    pub const BUILTIN: [StoreScript; 2] = [Self::COMPARE_AND_DELETE, Self::INCR_WITH_TTL];

    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }
}
